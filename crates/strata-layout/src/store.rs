use crate::helpers::{element_size, structure_contains_pointers};
use crate::structure::{Member, MemberType, Structure, StructureDef, StructureIndex, StructureItem, StructureKind, Template};
use crate::LayoutError;
use rustc_hash::FxHashSet;

/// Owns every structure defined for one loaded module.
///
/// Structures are added through the definition protocol
/// (`begin_structure`, `attach_member`, `attach_item`, `attach_template`,
/// `finalize_structure`) and are immutable once finalized.
#[derive(Debug, Default)]
pub struct StructureStore {
    pub structures: Vec<Structure>,
}

impl StructureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new structure definition and returns its index.
    ///
    /// The index is usable right away so that members of other structures
    /// (pointers in particular) can refer to it before it is finalized.
    pub fn begin_structure(&mut self, def: StructureDef) -> StructureIndex {
        let index = self.structures.len();
        log::trace!("begin structure #{} {:?} ({})", index, def.name, def.kind);
        self.structures.push(Structure::from_def(def));
        index
    }

    pub fn get(&self, index: StructureIndex) -> Result<&Structure, LayoutError> {
        self.structures.get(index).ok_or(LayoutError::MissingStructure(index))
    }

    /// Gets a structure that has been finalized.
    pub fn finalized(&self, index: StructureIndex) -> Result<&Structure, LayoutError> {
        let structure = self.get(index)?;
        if !structure.finalized {
            return Err(LayoutError::NotFinalized(structure.name.clone()));
        }
        Ok(structure)
    }

    fn open(&mut self, index: StructureIndex) -> Result<&mut Structure, LayoutError> {
        let structure = self.structures.get_mut(index).ok_or(LayoutError::MissingStructure(index))?;
        if structure.finalized {
            return Err(LayoutError::AlreadyFinalized(structure.name.clone()));
        }
        Ok(structure)
    }

    pub fn attach_member(&mut self, index: StructureIndex, member: Member) -> Result<(), LayoutError> {
        self.open(index)?.members.push(member);
        Ok(())
    }

    pub fn attach_item(&mut self, index: StructureIndex, name: &str, value: i128) -> Result<(), LayoutError> {
        self.open(index)?.items.push(StructureItem {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    pub fn attach_template(&mut self, index: StructureIndex, template: Template) -> Result<(), LayoutError> {
        self.open(index)?.template = Some(template);
        Ok(())
    }

    /// Validates a structure, computes its pointer flag and freezes it.
    pub fn finalize_structure(&mut self, index: StructureIndex) -> Result<&Structure, LayoutError> {
        {
            let structure = self.get(index)?;
            if structure.finalized {
                return Err(LayoutError::AlreadyFinalized(structure.name.clone()));
            }
            self.validate(structure)?;
        }
        let has_pointer = structure_contains_pointers(&self.structures[index], &self.structures);
        let structure = &mut self.structures[index];
        structure.has_pointer = has_pointer;
        structure.finalized = true;
        log::debug!(
            "finalized structure {:?}: kind={}, size={}, align={}, members={}, pointers={}",
            structure.name,
            structure.kind,
            structure.byte_size,
            structure.align,
            structure.members.len(),
            structure.has_pointer
        );
        Ok(&self.structures[index])
    }

    fn validate(&self, structure: &Structure) -> Result<(), LayoutError> {
        if structure.align == 0 || !structure.align.is_power_of_two() {
            return Err(LayoutError::InvalidAlignment(structure.name.clone(), structure.align));
        }
        self.validate_member_count(structure)?;

        let mut slots = FxHashSet::default();
        for member in &structure.members {
            self.validate_member(structure, member)?;
            if let Some(slot) = member.slot {
                if !slots.insert(slot) {
                    return Err(LayoutError::DuplicateSlot(structure.name.clone(), slot));
                }
            }
        }

        match structure.kind {
            StructureKind::Array => {
                let size = element_size(structure)?;
                if size == 0 || structure.byte_size % size != 0 {
                    return Err(LayoutError::ElementSizeMismatch {
                        name: structure.name.clone(),
                        byte_size: structure.byte_size,
                        element_size: size,
                    });
                }
            }
            StructureKind::Slice => {
                if element_size(structure)? != structure.byte_size {
                    return Err(LayoutError::ElementSizeMismatch {
                        name: structure.name.clone(),
                        byte_size: structure.byte_size,
                        element_size: element_size(structure)?,
                    });
                }
            }
            StructureKind::Enumeration | StructureKind::ErrorSet => {
                if structure.members[0].member_type != MemberType::Int {
                    return Err(LayoutError::UnexpectedMemberType {
                        name: structure.name.clone(),
                        member: structure.members[0].name.clone(),
                        expected: MemberType::Int,
                    });
                }
                let mut names = FxHashSet::default();
                let mut values = FxHashSet::default();
                for item in &structure.items {
                    if !names.insert(item.name.as_str()) || !values.insert(item.value) {
                        return Err(LayoutError::DuplicateItem(structure.name.clone(), item.name.clone()));
                    }
                }
            }
            StructureKind::TaggedUnion => {
                let selector = &structure.members[structure.members.len() - 1];
                if selector.member_type != MemberType::EnumerationItem {
                    return Err(LayoutError::UnexpectedMemberType {
                        name: structure.name.clone(),
                        member: selector.name.clone(),
                        expected: MemberType::EnumerationItem,
                    });
                }
            }
            StructureKind::BareUnion => {
                let selector = &structure.members[structure.members.len() - 1];
                if selector.member_type != MemberType::Int {
                    return Err(LayoutError::UnexpectedMemberType {
                        name: structure.name.clone(),
                        member: selector.name.clone(),
                        expected: MemberType::Int,
                    });
                }
            }
            StructureKind::Optional => {
                match structure.members.get(1) {
                    Some(flag) if flag.member_type != MemberType::Bool => {
                        return Err(LayoutError::UnexpectedMemberType {
                            name: structure.name.clone(),
                            member: flag.name.clone(),
                            expected: MemberType::Bool,
                        });
                    }
                    Some(_) => {}
                    None => {
                        // presence must then be encoded by a null pointer payload
                        let payload = &structure.members[0];
                        let is_pointer = payload
                            .structure
                            .and_then(|s| self.structures.get(s))
                            .map_or(false, |s| s.kind == StructureKind::Pointer);
                        if !is_pointer {
                            return Err(LayoutError::MissingMember(structure.name.clone(), "present".to_string()));
                        }
                    }
                }
            }
            StructureKind::ErrorUnion => {
                let error = &structure.members[1];
                let set = error.structure.and_then(|s| self.structures.get(s));
                if error.member_type != MemberType::Error || !set.map_or(false, |s| s.kind == StructureKind::ErrorSet) {
                    return Err(LayoutError::UnexpectedMemberType {
                        name: structure.name.clone(),
                        member: error.name.clone(),
                        expected: MemberType::Error,
                    });
                }
            }
            StructureKind::Pointer => {
                let target = &structure.members[0];
                if target.member_type != MemberType::Object || target.structure.is_none() {
                    return Err(LayoutError::UnexpectedMemberType {
                        name: structure.name.clone(),
                        member: target.name.clone(),
                        expected: MemberType::Object,
                    });
                }
            }
            _ => {}
        }

        if let Some(template) = &structure.template {
            if template.bytes.len() != structure.byte_size {
                return Err(LayoutError::TemplateSizeMismatch {
                    name: structure.name.clone(),
                    expected: structure.byte_size,
                    actual: template.bytes.len(),
                });
            }
        }
        Ok(())
    }

    fn validate_member_count(&self, structure: &Structure) -> Result<(), LayoutError> {
        let count = structure.members.len();
        let (min, max) = match structure.kind {
            StructureKind::Primitive
            | StructureKind::Pointer
            | StructureKind::Array
            | StructureKind::Slice
            | StructureKind::Enumeration
            | StructureKind::ErrorSet => (1, 1),
            StructureKind::Optional => (1, 2),
            StructureKind::ErrorUnion => (2, 2),
            StructureKind::BareUnion | StructureKind::TaggedUnion => (2, usize::MAX),
            StructureKind::Struct | StructureKind::ArgStruct | StructureKind::ExternUnion => (0, usize::MAX),
        };
        if count < min || count > max {
            return Err(LayoutError::UnexpectedMemberCount {
                name: structure.name.clone(),
                kind: structure.kind,
                found: count,
            });
        }
        Ok(())
    }

    fn validate_member(&self, structure: &Structure, member: &Member) -> Result<(), LayoutError> {
        if member.member_type.needs_structure() {
            let index = member
                .structure
                .ok_or_else(|| LayoutError::MissingMemberStructure(structure.name.clone(), member.name.clone()))?;
            let child = self.get(index)?;
            // pointers may refer to structures that are still being defined
            if structure.kind != StructureKind::Pointer && !child.finalized {
                return Err(LayoutError::UnfinalizedMember(structure.name.clone(), member.name.clone()));
            }
        }
        if matches!(member.member_type, MemberType::Void | MemberType::Type) {
            return Ok(());
        }

        // element members of arrays and slices carry no offset of their own
        let bit_offset = match (member.bit_offset, structure.kind.has_elements()) {
            (Some(offset), _) => offset,
            (None, true) => 0,
            (None, false) => {
                return Err(LayoutError::MissingBitOffset(structure.name.clone(), member.name.clone()));
            }
        };
        if member.member_type == MemberType::Object && (bit_offset % 8 != 0 || member.byte_size.is_none()) {
            return Err(LayoutError::MisalignedObject(structure.name.clone(), member.name.clone()));
        }
        if member.byte_size.is_some() && bit_offset % 8 != 0 {
            return Err(LayoutError::MisalignedObject(structure.name.clone(), member.name.clone()));
        }
        let extent = match member.byte_size {
            Some(bytes) => (bit_offset >> 3) * 8 + bytes * 8,
            None => bit_offset + member.bit_size,
        };
        if structure.kind != StructureKind::Pointer && extent > structure.byte_size * 8 {
            return Err(LayoutError::MemberOutOfRange {
                name: structure.name.clone(),
                member: member.name.clone(),
                end_bit: extent,
                byte_size: structure.byte_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_struct(store: &mut StructureStore) -> StructureIndex {
        let s = store.begin_structure(StructureDef::new("Pair", StructureKind::Struct, 8, 4));
        store.attach_member(s, Member::int("dog", 0, 32)).unwrap();
        store.attach_member(s, Member::int("cat", 32, 32)).unwrap();
        s
    }

    #[test]
    fn test_finalize_simple_struct() {
        let mut store = StructureStore::new();
        let s = int_struct(&mut store);
        let structure = store.finalize_structure(s).unwrap();
        assert!(structure.finalized);
        assert!(!structure.has_pointer);
        assert_eq!(structure.members.len(), 2);
    }

    #[test]
    fn test_cannot_modify_after_finalize() {
        let mut store = StructureStore::new();
        let s = int_struct(&mut store);
        store.finalize_structure(s).unwrap();
        let err = store.attach_member(s, Member::int("bird", 0, 8)).unwrap_err();
        assert!(matches!(err, LayoutError::AlreadyFinalized(_)));
        assert!(matches!(store.finalize_structure(s), Err(LayoutError::AlreadyFinalized(_))));
    }

    #[test]
    fn test_member_out_of_range() {
        let mut store = StructureStore::new();
        let s = store.begin_structure(StructureDef::new("Small", StructureKind::Struct, 4, 4));
        store.attach_member(s, Member::int("a", 16, 32)).unwrap();
        assert!(matches!(store.finalize_structure(s), Err(LayoutError::MemberOutOfRange { .. })));
    }

    #[test]
    fn test_misaligned_object_member() {
        let mut store = StructureStore::new();
        let inner = int_struct(&mut store);
        store.finalize_structure(inner).unwrap();
        let outer = store.begin_structure(StructureDef::new("Outer", StructureKind::Struct, 16, 4));
        let mut member = Member::object("pair", 3, 8, 0, inner);
        member.bit_offset = Some(3);
        store.attach_member(outer, member).unwrap();
        assert!(matches!(store.finalize_structure(outer), Err(LayoutError::MisalignedObject(..))));
    }

    #[test]
    fn test_template_size_checked() {
        let mut store = StructureStore::new();
        let s = int_struct(&mut store);
        store.attach_template(s, Template::new(vec![0; 4])).unwrap();
        assert!(matches!(
            store.finalize_structure(s),
            Err(LayoutError::TemplateSizeMismatch { expected: 8, actual: 4, .. })
        ));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut store = StructureStore::new();
        let inner = int_struct(&mut store);
        store.finalize_structure(inner).unwrap();
        let outer = store.begin_structure(StructureDef::new("Outer", StructureKind::Struct, 16, 4));
        store.attach_member(outer, Member::object("a", 0, 8, 0, inner)).unwrap();
        store.attach_member(outer, Member::object("b", 64, 8, 0, inner)).unwrap();
        assert!(matches!(store.finalize_structure(outer), Err(LayoutError::DuplicateSlot(_, 0))));
    }

    #[test]
    fn test_pointer_flag_propagates() {
        let mut store = StructureStore::new();
        let target = int_struct(&mut store);
        store.finalize_structure(target).unwrap();
        let ptr = store.begin_structure(StructureDef::new("*Pair", StructureKind::Pointer, 4, 4));
        store.attach_member(ptr, Member::object("target", 0, 4, 0, target)).unwrap();
        assert!(store.finalize_structure(ptr).unwrap().has_pointer);

        let holder = store.begin_structure(StructureDef::new("Holder", StructureKind::Struct, 4, 4));
        store.attach_member(holder, Member::object("ptr", 0, 4, 0, ptr)).unwrap();
        assert!(store.finalize_structure(holder).unwrap().has_pointer);
    }

    #[test]
    fn test_pointer_may_reference_unfinished_structure() {
        let mut store = StructureStore::new();
        let node = store.begin_structure(StructureDef::new("Node", StructureKind::Struct, 8, 4));
        let ptr = store.begin_structure(StructureDef::new("*Node", StructureKind::Pointer, 4, 4));
        store.attach_member(ptr, Member::object("target", 0, 4, 0, node)).unwrap();
        store.finalize_structure(ptr).unwrap();
        store.attach_member(node, Member::int("value", 0, 32)).unwrap();
        store.attach_member(node, Member::object("next", 32, 4, 0, ptr)).unwrap();
        assert!(store.finalize_structure(node).unwrap().has_pointer);
    }

    #[test]
    fn test_duplicate_enum_values_rejected() {
        let mut store = StructureStore::new();
        let e = store.begin_structure(StructureDef::new("Pet", StructureKind::Enumeration, 4, 4));
        store.attach_member(e, Member::uint("value", 0, 32)).unwrap();
        store.attach_item(e, "Dog", 0).unwrap();
        store.attach_item(e, "Cat", 0).unwrap();
        assert!(matches!(store.finalize_structure(e), Err(LayoutError::DuplicateItem(..))));
    }
}
