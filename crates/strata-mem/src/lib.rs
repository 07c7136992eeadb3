//! Byte-level machinery for typed views over foreign module memory.
//!
//! Two pieces live here: the [`AccessorFactory`], which builds getter and
//! setter functions for scalars of any width at any bit offset, and the
//! [`ViewRegistry`], which hands out canonical views over relocatable
//! buffers and externally addressed (fixed) memory.

use miette::Diagnostic;
use thiserror::Error;

pub mod accessor;
mod provider;
mod registry;

pub use accessor::{AccessorFactory, AccessorSignature, Getter, Scalar, ScalarKind, Setter, WideInt};
pub use provider::{LinearMemory, MemoryProvider};
pub use registry::{AllocKind, BufferId, FixedAllocation, ViewId, ViewInfo, ViewRegistry};

/// An address in fixed memory.
pub type Address = usize;

/// Byte order of multi-byte scalars, fixed per loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Errors raised by a scalar accessor.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Value {value} does not fit in a {bits}-bit integer (signed: {signed})")]
    #[diagnostic(code(strata::mem::overflow), help("disable runtime safety to truncate out-of-range values"))]
    Overflow { value: String, bits: usize, signed: bool },

    #[error("Access of {len} bytes at offset {offset} exceeds {available} available bytes")]
    #[diagnostic(code(strata::mem::range))]
    Range { offset: usize, len: usize, available: usize },

    #[error("Cannot store {found} in a {expected} field")]
    #[diagnostic(code(strata::mem::type_mismatch))]
    TypeMismatch { expected: &'static str, found: String },
}

/// Errors raised by the view registry and memory providers.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("View {0} is not backed by fixed memory")]
    #[diagnostic(code(strata::mem::not_addressable), help("only fixed views and shadows have addresses"))]
    NotAddressable(ViewId),

    #[error("Range of {len} bytes at offset {offset} is outside a {available}-byte region")]
    #[diagnostic(code(strata::mem::range))]
    Range { offset: usize, len: usize, available: usize },

    #[error("Out of fixed memory allocating {len} bytes aligned to {align}")]
    #[diagnostic(code(strata::mem::out_of_memory))]
    OutOfMemory { len: usize, align: usize },

    #[error("Address {0:#x} is not part of fixed memory")]
    #[diagnostic(code(strata::mem::invalid_address))]
    InvalidAddress(Address),

    #[error("Unknown view {0}")]
    #[diagnostic(code(strata::mem::invalid_view))]
    InvalidView(ViewId),

    #[error("Unknown buffer {0}")]
    #[diagnostic(code(strata::mem::invalid_buffer))]
    InvalidBuffer(BufferId),

    #[error("Invalid layout: {0}")]
    #[diagnostic(code(strata::mem::invalid_layout), help("alignment must be a non-zero power of two"))]
    InvalidLayout(String),
}
