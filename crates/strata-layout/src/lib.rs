//! Structure descriptors for data declared by a foreign compiled module.
//!
//! A module loader describes every type it exposes through the definition
//! protocol on [`StructureStore`]; the runtime turns finalized structures into
//! constructors of typed views.

use miette::Diagnostic;
use thiserror::Error;

pub mod helpers;
mod store;
mod structure;

pub use store::StructureStore;
pub use structure::{
    Member, MemberType, Structure, StructureDef, StructureIndex, StructureItem, StructureKind, Template,
};

/// Errors raised while defining structures.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Missing structure for index: {0}")]
    #[diagnostic(code(strata::layout::missing_structure))]
    MissingStructure(StructureIndex),

    #[error("Structure {0} is already finalized")]
    #[diagnostic(code(strata::layout::finalized), help("structures are immutable once finalized"))]
    AlreadyFinalized(String),

    #[error("Structure {0} has not been finalized")]
    #[diagnostic(code(strata::layout::not_finalized))]
    NotFinalized(String),

    #[error("Structure {0} has invalid alignment {1}")]
    #[diagnostic(code(strata::layout::alignment), help("alignment must be a non-zero power of two"))]
    InvalidAlignment(String, usize),

    #[error("Structure {name} ({kind}) cannot have {found} members")]
    #[diagnostic(code(strata::layout::member_count))]
    UnexpectedMemberCount { name: String, kind: StructureKind, found: usize },

    #[error("Structure {name} is a {kind}, expected {expected}")]
    #[diagnostic(code(strata::layout::kind))]
    UnexpectedKind { name: String, kind: StructureKind, expected: &'static str },

    #[error("Structure {0} is missing its {1} member")]
    #[diagnostic(code(strata::layout::missing_member))]
    MissingMember(String, String),

    #[error("Member {member} of {name} must be of type {expected:?}")]
    #[diagnostic(code(strata::layout::member_type))]
    UnexpectedMemberType { name: String, member: String, expected: MemberType },

    #[error("Member {1} of {0} refers to no structure")]
    #[diagnostic(code(strata::layout::member_structure))]
    MissingMemberStructure(String, String),

    #[error("Member {1} of {0} refers to a structure that is not finalized")]
    #[diagnostic(code(strata::layout::unfinalized_member), help("finalize nested structures first"))]
    UnfinalizedMember(String, String),

    #[error("Member {1} of {0} has no bit offset")]
    #[diagnostic(code(strata::layout::bit_offset))]
    MissingBitOffset(String, String),

    #[error("Member {1} of {0} must be byte-aligned")]
    #[diagnostic(code(strata::layout::misaligned))]
    MisalignedObject(String, String),

    #[error("Member {member} of {name} ends at bit {end_bit}, beyond the {byte_size}-byte structure")]
    #[diagnostic(code(strata::layout::member_range))]
    MemberOutOfRange { name: String, member: String, end_bit: usize, byte_size: usize },

    #[error("Slot {1} is used twice in {0}")]
    #[diagnostic(code(strata::layout::duplicate_slot))]
    DuplicateSlot(String, usize),

    #[error("Item {1} of {0} is defined twice")]
    #[diagnostic(code(strata::layout::duplicate_item))]
    DuplicateItem(String, String),

    #[error("Template of {name} has {actual} bytes, expected {expected}")]
    #[diagnostic(code(strata::layout::template_size))]
    TemplateSizeMismatch { name: String, expected: usize, actual: usize },

    #[error("Structure {name} has {byte_size} bytes, not a multiple of its {element_size}-byte element")]
    #[diagnostic(code(strata::layout::element_size))]
    ElementSizeMismatch { name: String, byte_size: usize, element_size: usize },
}
