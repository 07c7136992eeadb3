//! Per-structure access plans, derived once at finalization.

use strata_layout::helpers::{element_size, pointer_target};
use strata_layout::{LayoutError, MemberType, Structure, StructureKind, StructureStore};
use strata_mem::{AccessorFactory, AccessorSignature, Getter, ScalarKind, Setter};

/// How one member is read and written.
#[derive(Clone)]
pub(crate) struct MemberPlan {
    pub byte_offset: usize,
    pub byte_size: usize,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
}

/// Everything needed to access instances of a structure without going back
/// to the descriptor.
#[derive(Clone)]
pub(crate) struct StructurePlan {
    pub members: Vec<MemberPlan>,
    /// Size of the slot table of one instance (arrays use one slot per
    /// element instead).
    pub slot_count: usize,
    /// Object members that hold pointers, directly or transitively. The
    /// pointer copier and resetter walk these.
    pub pointer_members: Vec<usize>,
    pub element_size: usize,
    /// `log2(element_size)` when the element size is a power of two.
    pub element_shift: Option<u32>,
    /// Address field of a pointer, and the element count of a fat pointer.
    pub address: Option<MemberPlan>,
    pub count: Option<MemberPlan>,
}

fn scalar_kind(member_type: MemberType) -> Option<ScalarKind> {
    match member_type {
        MemberType::Bool => Some(ScalarKind::Bool),
        MemberType::Int | MemberType::EnumerationItem | MemberType::Error => Some(ScalarKind::Int),
        MemberType::Float => Some(ScalarKind::Float),
        _ => None,
    }
}

impl StructurePlan {
    pub fn build(
        structure: &Structure,
        store: &StructureStore,
        accessors: &mut AccessorFactory,
        address_size: usize,
    ) -> Result<Self, LayoutError> {
        let mut members = Vec::with_capacity(structure.members.len());
        let mut pointer_members = Vec::new();
        let mut slot_count = 0;
        for (index, member) in structure.members.iter().enumerate() {
            let bit_offset = member.bit_offset.unwrap_or(0);
            let (getter, setter) = match scalar_kind(member.member_type) {
                Some(kind) => {
                    let sig = AccessorSignature::new(kind, member.bit_size, bit_offset, member.signed);
                    (Some(accessors.getter(sig)), Some(accessors.setter(sig)))
                }
                None => (None, None),
            };
            if let Some(slot) = member.slot {
                slot_count = slot_count.max(slot + 1);
            }
            if member.member_type == MemberType::Object && structure.kind != StructureKind::Pointer {
                let child = member.structure.map(|s| store.get(s)).transpose()?;
                if child.map_or(false, |c| c.kind == StructureKind::Pointer || c.has_pointer) {
                    pointer_members.push(index);
                }
            }
            members.push(MemberPlan {
                byte_offset: bit_offset >> 3,
                byte_size: member.byte_size.unwrap_or_else(|| member.bit_size.div_ceil(8)),
                getter,
                setter,
            });
        }
        let element_size = if structure.kind.has_elements() {
            element_size(structure)?
        } else {
            0
        };
        let element_shift = (element_size > 0 && element_size.is_power_of_two()).then(|| element_size.trailing_zeros());
        let (address, count) = if structure.kind == StructureKind::Pointer {
            let target = store.get(pointer_target(structure)?)?;
            let field = |offset: usize, accessors: &mut AccessorFactory| {
                let sig = AccessorSignature::int(address_size * 8, 0, false);
                MemberPlan {
                    byte_offset: offset,
                    byte_size: address_size,
                    getter: Some(accessors.getter(sig)),
                    setter: Some(accessors.setter(sig)),
                }
            };
            let count = (target.kind == StructureKind::Slice).then(|| field(address_size, accessors));
            (Some(field(0, accessors)), count)
        } else {
            (None, None)
        };
        Ok(StructurePlan {
            members,
            slot_count,
            pointer_members,
            element_size,
            element_shift,
            address,
            count,
        })
    }

    /// Number of elements in `byte_len` bytes.
    pub fn element_count(&self, byte_len: usize) -> usize {
        match self.element_shift {
            Some(shift) => byte_len >> shift,
            None if self.element_size > 0 => byte_len / self.element_size,
            None => 0,
        }
    }
}
