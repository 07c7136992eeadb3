use crate::structure::{Member, MemberType, Structure, StructureIndex, StructureKind};
use crate::LayoutError;

/// Rounds `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        (value + align - 1) & !(align - 1)
    }
}

/// Gets the element member of an array or slice structure.
pub fn element_member(structure: &Structure) -> Result<&Member, LayoutError> {
    if !structure.kind.has_elements() {
        return Err(LayoutError::UnexpectedKind {
            name: structure.name.clone(),
            kind: structure.kind,
            expected: "array or slice",
        });
    }
    structure
        .members
        .first()
        .ok_or_else(|| LayoutError::MissingMember(structure.name.clone(), "element".to_string()))
}

/// Gets the byte size of one element of an array or slice.
pub fn element_size(structure: &Structure) -> Result<usize, LayoutError> {
    let member = element_member(structure)?;
    Ok(member.byte_size.unwrap_or_else(|| member.bit_size.div_ceil(8)))
}

/// Gets the selector member of an exclusive union (always the last member).
pub fn selector_member(structure: &Structure) -> Result<(usize, &Member), LayoutError> {
    if !structure.kind.is_exclusive_union() {
        return Err(LayoutError::UnexpectedKind {
            name: structure.name.clone(),
            kind: structure.kind,
            expected: "bare or tagged union",
        });
    }
    let index = structure
        .members
        .len()
        .checked_sub(1)
        .ok_or_else(|| LayoutError::MissingMember(structure.name.clone(), "selector".to_string()))?;
    Ok((index, &structure.members[index]))
}

/// Gets the variant members of a union, excluding the selector.
pub fn variant_members(structure: &Structure) -> &[Member] {
    if structure.kind.is_exclusive_union() && !structure.members.is_empty() {
        &structure.members[..structure.members.len() - 1]
    } else {
        &structure.members
    }
}

/// Gets the payload member of an optional or error union.
pub fn payload_member(structure: &Structure) -> Result<&Member, LayoutError> {
    match structure.kind {
        StructureKind::Optional | StructureKind::ErrorUnion => structure
            .members
            .first()
            .ok_or_else(|| LayoutError::MissingMember(structure.name.clone(), "value".to_string())),
        kind => Err(LayoutError::UnexpectedKind {
            name: structure.name.clone(),
            kind,
            expected: "optional or error union",
        }),
    }
}

/// Gets the presence flag of an optional, or `None` when presence is
/// encoded by a non-null pointer payload.
pub fn presence_member(structure: &Structure) -> Option<&Member> {
    match structure.kind {
        StructureKind::Optional => structure.members.get(1),
        _ => None,
    }
}

/// Gets the error-code member of an error union.
pub fn error_member(structure: &Structure) -> Result<&Member, LayoutError> {
    match structure.kind {
        StructureKind::ErrorUnion => structure
            .members
            .get(1)
            .ok_or_else(|| LayoutError::MissingMember(structure.name.clone(), "error".to_string())),
        kind => Err(LayoutError::UnexpectedKind {
            name: structure.name.clone(),
            kind,
            expected: "error union",
        }),
    }
}

/// Gets the structure a pointer structure points at.
pub fn pointer_target(structure: &Structure) -> Result<StructureIndex, LayoutError> {
    if structure.kind != StructureKind::Pointer {
        return Err(LayoutError::UnexpectedKind {
            name: structure.name.clone(),
            kind: structure.kind,
            expected: "pointer",
        });
    }
    structure
        .members
        .first()
        .and_then(|m| m.structure)
        .ok_or_else(|| LayoutError::MissingMember(structure.name.clone(), "target".to_string()))
}

/// Gets the value member of a primitive, enumeration or error set.
pub fn value_member(structure: &Structure) -> Result<&Member, LayoutError> {
    match structure.kind {
        StructureKind::Primitive | StructureKind::Enumeration | StructureKind::ErrorSet => structure
            .members
            .first()
            .ok_or_else(|| LayoutError::MissingMember(structure.name.clone(), "value".to_string())),
        kind => Err(LayoutError::UnexpectedKind {
            name: structure.name.clone(),
            kind,
            expected: "primitive, enumeration or error set",
        }),
    }
}

/// Checks whether a structure contains pointers, looking through finalized
/// member structures.
///
/// Pointers are always reported; unfinalized member structures (forward
/// references through pointers) are treated as pointer-free.
pub fn structure_contains_pointers(structure: &Structure, all: &[Structure]) -> bool {
    if structure.kind == StructureKind::Pointer {
        return true;
    }
    let mut stack: Vec<&Structure> = vec![structure];
    let mut visited = rustc_hash::FxHashSet::default();
    while let Some(current) = stack.pop() {
        if current.kind == StructureKind::Pointer {
            return true;
        }
        for member in &current.members {
            if member.member_type != MemberType::Object {
                continue;
            }
            let Some(index) = member.structure else { continue };
            if !visited.insert(index) {
                continue;
            }
            if let Some(child) = all.get(index) {
                if child.kind == StructureKind::Pointer || (child.finalized && child.has_pointer) {
                    return true;
                }
                if !child.finalized {
                    stack.push(child);
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(9, 4), 12);
        assert_eq!(align_up(7, 1), 7);
    }
}
