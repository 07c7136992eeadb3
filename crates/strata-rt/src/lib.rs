//! Typed views over the memory of a foreign compiled module.
//!
//! An [`Environment`] holds the structures a module declares, the objects
//! created over their bytes and the state of calls in flight. Objects live in
//! an arena and are referred to by [`ObjectId`]; their bytes are either
//! relocatable host buffers or fixed memory owned by the module.
//!
//! Calls go through [`Environment::invoke`]: pointers reachable from the
//! arguments are given fixed addresses (shadowing relocatable targets for the
//! duration of the call) and are mapped back onto objects afterwards.

mod access;
mod call;
mod collection;
pub mod config;
mod context;
mod enums;
mod env;
pub mod error;
mod object;
mod plan;
mod pointer;
mod sync;
mod value;

pub use call::ForeignModule;
pub use collection::Elements;
pub use config::{Endian, EnvOptions, MemoryOptions};
pub use context::ContextId;
pub use env::{Constructor, Environment};
pub use error::{ConfigError, MarshalError};
pub use value::{ObjectId, Value};

pub use strata_layout::{Member, MemberType, StructureDef, StructureIndex, StructureKind, Template};
pub use strata_mem::{Address, ViewId};
