use std::fmt;

/// Index of a structure inside a [`crate::StructureStore`].
pub type StructureIndex = usize;

/// The shape family a structure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    /// A single scalar (or type) wrapped in an object.
    Primitive,
    /// Fixed-length homogeneous sequence.
    Array,
    /// Ordinary record.
    Struct,
    /// Record holding the arguments and the `retval` of a foreign function.
    ArgStruct,
    /// Union whose members all overlay the same bytes and are all readable.
    ExternUnion,
    /// Exclusive union with a hidden integer selector.
    BareUnion,
    /// Exclusive union selected by an enumeration tag.
    TaggedUnion,
    /// Payload plus presence flag.
    Optional,
    /// Payload plus error code.
    ErrorUnion,
    /// Closed set of error codes, exposed as singleton items.
    ErrorSet,
    /// Closed set of named integer values, exposed as singleton items.
    Enumeration,
    /// Address of a single target (or of a slice, for fat pointers).
    Pointer,
    /// Variable-length homogeneous sequence; `byte_size` is the element size.
    Slice,
}

impl StructureKind {
    pub fn is_union(self) -> bool {
        matches!(self, StructureKind::ExternUnion | StructureKind::BareUnion | StructureKind::TaggedUnion)
    }

    /// Unions where only the member named by the selector may be accessed.
    pub fn is_exclusive_union(self) -> bool {
        matches!(self, StructureKind::BareUnion | StructureKind::TaggedUnion)
    }

    pub fn has_elements(self) -> bool {
        matches!(self, StructureKind::Array | StructureKind::Slice)
    }

    /// Kinds whose instances are predefined singletons that cannot be constructed.
    pub fn is_singleton(self) -> bool {
        matches!(self, StructureKind::Enumeration | StructureKind::ErrorSet)
    }

    pub fn is_record(self) -> bool {
        matches!(self, StructureKind::Struct | StructureKind::ArgStruct)
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureKind::Primitive => "primitive",
            StructureKind::Array => "array",
            StructureKind::Struct => "struct",
            StructureKind::ArgStruct => "argument struct",
            StructureKind::ExternUnion => "extern union",
            StructureKind::BareUnion => "bare union",
            StructureKind::TaggedUnion => "tagged union",
            StructureKind::Optional => "optional",
            StructureKind::ErrorUnion => "error union",
            StructureKind::ErrorSet => "error set",
            StructureKind::Enumeration => "enumeration",
            StructureKind::Pointer => "pointer",
            StructureKind::Slice => "slice",
        };
        f.write_str(name)
    }
}

/// How the bits of a member are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    Void,
    Bool,
    Int,
    Float,
    /// Raw integer mapped onto an item of the member's enumeration structure.
    EnumerationItem,
    /// Error code mapped onto an item of the member's error-set structure.
    Error,
    /// Nested aggregate or pointer held in a slot.
    Object,
    /// Compile-time type reference; occupies no bytes.
    Type,
}

impl MemberType {
    /// Members that are read through the bit accessors.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            MemberType::Bool | MemberType::Int | MemberType::Float | MemberType::EnumerationItem | MemberType::Error
        )
    }

    pub fn needs_structure(self) -> bool {
        matches!(self, MemberType::Object | MemberType::EnumerationItem | MemberType::Error)
    }
}

/// A field of a structure.
///
/// Bit offsets are absolute from the start of the owning structure's bytes.
/// `byte_size` is present only when the member is byte-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub member_type: MemberType,
    pub bit_offset: Option<usize>,
    pub bit_size: usize,
    pub byte_size: Option<usize>,
    pub slot: Option<usize>,
    pub signed: bool,
    pub is_const: bool,
    pub structure: Option<StructureIndex>,
}

impl Member {
    fn scalar(name: &str, member_type: MemberType, bit_offset: usize, bit_size: usize, signed: bool) -> Self {
        let byte_size = if bit_offset % 8 == 0 && bit_size % 8 == 0 {
            Some(bit_size / 8)
        } else {
            None
        };
        Member {
            name: name.to_string(),
            member_type,
            bit_offset: Some(bit_offset),
            bit_size,
            byte_size,
            slot: None,
            signed,
            is_const: false,
            structure: None,
        }
    }

    pub fn int(name: &str, bit_offset: usize, bit_size: usize) -> Self {
        Self::scalar(name, MemberType::Int, bit_offset, bit_size, true)
    }

    pub fn uint(name: &str, bit_offset: usize, bit_size: usize) -> Self {
        Self::scalar(name, MemberType::Int, bit_offset, bit_size, false)
    }

    pub fn float(name: &str, bit_offset: usize, bit_size: usize) -> Self {
        let mut member = Self::scalar(name, MemberType::Float, bit_offset, bit_size, true);
        // f80 lives in a 16-byte container
        if bit_size == 80 && bit_offset % 8 == 0 {
            member.byte_size = Some(16);
        }
        member
    }

    pub fn boolean(name: &str, bit_offset: usize, bit_size: usize) -> Self {
        Self::scalar(name, MemberType::Bool, bit_offset, bit_size, false)
    }

    pub fn enum_item(name: &str, bit_offset: usize, bit_size: usize, structure: StructureIndex) -> Self {
        let mut member = Self::scalar(name, MemberType::EnumerationItem, bit_offset, bit_size, false);
        member.structure = Some(structure);
        member
    }

    pub fn error(name: &str, bit_offset: usize, bit_size: usize, structure: StructureIndex) -> Self {
        let mut member = Self::scalar(name, MemberType::Error, bit_offset, bit_size, false);
        member.structure = Some(structure);
        member
    }

    pub fn object(name: &str, bit_offset: usize, byte_size: usize, slot: usize, structure: StructureIndex) -> Self {
        Member {
            name: name.to_string(),
            member_type: MemberType::Object,
            bit_offset: Some(bit_offset),
            bit_size: byte_size * 8,
            byte_size: Some(byte_size),
            slot: Some(slot),
            signed: false,
            is_const: false,
            structure: Some(structure),
        }
    }

    pub fn void(name: &str) -> Self {
        Member {
            name: name.to_string(),
            member_type: MemberType::Void,
            bit_offset: Some(0),
            bit_size: 0,
            byte_size: Some(0),
            slot: None,
            signed: false,
            is_const: false,
            structure: None,
        }
    }

    pub fn type_ref(name: &str, structure: StructureIndex) -> Self {
        Member {
            name: name.to_string(),
            member_type: MemberType::Type,
            bit_offset: None,
            bit_size: 0,
            byte_size: None,
            slot: None,
            signed: false,
            is_const: false,
            structure: Some(structure),
        }
    }

    pub fn with_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    /// Offset of the first byte touched by this member.
    pub fn byte_offset(&self) -> usize {
        self.bit_offset.unwrap_or(0) >> 3
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_offset.unwrap_or(0) % 8 == 0 && self.byte_size.is_some()
    }
}

/// A named value of an enumeration or error set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureItem {
    pub name: String,
    pub value: i128,
}

/// Default bytes applied to freshly constructed instances.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    pub bytes: Vec<u8>,
}

impl Template {
    pub fn new(bytes: Vec<u8>) -> Self {
        Template { bytes }
    }
}

/// Header of a structure, supplied when a definition begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureDef {
    pub name: String,
    pub kind: StructureKind,
    pub byte_size: usize,
    pub align: usize,
    pub is_const: bool,
}

impl StructureDef {
    pub fn new(name: &str, kind: StructureKind, byte_size: usize, align: usize) -> Self {
        StructureDef {
            name: name.to_string(),
            kind,
            byte_size,
            align,
            is_const: false,
        }
    }

    /// Marks a pointer structure as pointing at immutable data.
    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }
}

/// A type descriptor for a foreign data structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub name: String,
    pub kind: StructureKind,
    pub byte_size: usize,
    pub align: usize,
    pub is_const: bool,
    pub members: Vec<Member>,
    pub items: Vec<StructureItem>,
    pub template: Option<Template>,
    /// True when any member transitively contains a pointer.
    pub has_pointer: bool,
    pub finalized: bool,
}

impl Structure {
    pub(crate) fn from_def(def: StructureDef) -> Self {
        Structure {
            name: def.name,
            kind: def.kind,
            byte_size: def.byte_size,
            align: def.align,
            is_const: def.is_const,
            members: Vec::new(),
            items: Vec::new(),
            template: None,
            has_pointer: false,
            finalized: false,
        }
    }

    pub fn member(&self, name: &str) -> Option<(usize, &Member)> {
        self.members.iter().enumerate().find(|(_, m)| m.name == name)
    }

    pub fn item(&self, name: &str) -> Option<&StructureItem> {
        self.items.iter().find(|item| item.name == name)
    }
}
