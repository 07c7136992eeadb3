use miette::Diagnostic;
use strata_layout::LayoutError;
use strata_mem::{AccessError, MemoryError, ViewId};
use thiserror::Error;

/// Errors raised while marshaling values in and out of foreign memory.
///
/// Every error surfaces at the point of violation; nothing is retried.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("Value {value} does not fit in a {bits}-bit integer (signed: {signed})")]
    #[diagnostic(code(strata::overflow), help("disable runtime_safety to truncate instead"))]
    Overflow { value: String, bits: usize, signed: bool },

    #[error("{structure} needs {expected} bytes, got {actual}")]
    #[diagnostic(code(strata::size_mismatch))]
    SizeMismatch { structure: String, expected: usize, actual: usize },

    #[error("Index {index} is out of bounds for length {length}")]
    #[diagnostic(code(strata::out_of_bounds))]
    OutOfBounds { index: usize, length: usize },

    #[error("Pointer targets in {structure} at offsets {first} and {second} cannot share one aligned shadow")]
    #[diagnostic(
        code(strata::alignment_conflict),
        help("overlapping targets must agree on alignment relative to each other")
    )]
    AlignmentConflict { structure: String, first: usize, second: usize },

    #[error("{structure} has no item with value {value}")]
    #[diagnostic(code(strata::invalid_enum))]
    InvalidEnum { structure: String, value: String },

    #[error("{structure} expects one of its items, got {found}")]
    #[diagnostic(code(strata::enum_expected))]
    EnumExpected { structure: String, found: String },

    #[error("Cannot create new items of enumeration {0}")]
    #[diagnostic(code(strata::no_new_enum), help("look up an existing item by name or value"))]
    NoNewEnum(String),

    #[error("Cannot create new errors of error set {0}")]
    #[diagnostic(code(strata::no_new_error), help("look up an existing error by name or number"))]
    NoNewError(String),

    #[error("Member {member} of {structure} is not the active member")]
    #[diagnostic(code(strata::inactive_union_member), help("assign the whole union to switch members"))]
    InactiveUnionMember { structure: String, member: String },

    #[error("Error {error} is not part of {structure}")]
    #[diagnostic(code(strata::not_in_error_set))]
    NotInErrorSet { structure: String, error: String },

    #[error("{structure} has no error numbered {number}")]
    #[diagnostic(code(strata::unknown_error_number))]
    UnknownErrorNumber { structure: String, number: i128 },

    #[error("Expected an instance of {expected}, got {found}")]
    #[diagnostic(code(strata::invalid_type))]
    InvalidType { expected: String, found: String },

    #[error("{0} has no fixed address")]
    #[diagnostic(code(strata::not_addressable))]
    NotAddressable(ViewId),

    #[error("error.{name}")]
    #[diagnostic(code(strata::error_returned))]
    ErrorReturned { name: String, number: i128, item: crate::ObjectId },

    #[error("Pointer of {structure} holds the uninitialized address {address:#x} with {count} elements")]
    #[diagnostic(code(strata::uninitialized_pointer))]
    UninitializedPointer { structure: String, address: usize, count: usize },

    #[error("{structure} has no member named {name}")]
    #[diagnostic(code(strata::no_property))]
    NoProperty { structure: String, name: String },

    #[error("Call context {found} ended while {expected} is innermost")]
    #[diagnostic(code(strata::context_mismatch), help("call contexts must end in reverse order of creation"))]
    ContextMismatch { expected: String, found: String },

    #[error("Foreign call failed: {0}")]
    #[diagnostic(code(strata::call_failed))]
    CallFailed(String),

    #[error("Unknown object {0}")]
    #[diagnostic(code(strata::invalid_object))]
    InvalidObject(crate::ObjectId),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Access(AccessError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(MemoryError),
}

impl From<AccessError> for MarshalError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Range { offset, len, available } => MarshalError::OutOfBounds {
                index: offset.saturating_add(len),
                length: available,
            },
            AccessError::Overflow { value, bits, signed } => MarshalError::Overflow { value, bits, signed },
            other => MarshalError::Access(other),
        }
    }
}

impl From<MemoryError> for MarshalError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::NotAddressable(view) => MarshalError::NotAddressable(view),
            MemoryError::Range { offset, len, available } => MarshalError::OutOfBounds {
                index: offset.saturating_add(len),
                length: available,
            },
            other => MarshalError::Memory(other),
        }
    }
}

/// Errors raised while loading [`crate::EnvOptions`].
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Error reading environment configuration: {0}")]
    #[diagnostic(code(strata::config::read), help("check that the file exists and is readable"))]
    Read(String),

    #[error("Invalid environment configuration: {0}")]
    #[diagnostic(code(strata::config::parse), help("check the TOML syntax and field names"))]
    Parse(String),

    #[error("Unsupported {field}: {value}")]
    #[diagnostic(code(strata::config::unsupported))]
    Unsupported { field: &'static str, value: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Read(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
