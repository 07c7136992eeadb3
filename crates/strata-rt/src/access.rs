//! Member access and whole-value reads and writes for every structure kind.

use crate::env::Environment;
use crate::error::MarshalError;
use crate::value::{ObjectId, Value};
use strata_layout::helpers::{presence_member, selector_member};
use strata_layout::{MemberType, StructureKind};
use strata_mem::Scalar;

impl Environment {
    fn member_index(&self, object: ObjectId, name: &str) -> Result<usize, MarshalError> {
        let structure = self.describe(object)?;
        structure.member(name).map(|(index, _)| index).ok_or_else(|| MarshalError::NoProperty {
            structure: structure.name.clone(),
            name: name.to_string(),
        })
    }

    /// Reads a member by name.
    ///
    /// Scalars, primitives, optionals and error unions come back as plain
    /// values; aggregates and pointers come back as objects. Inactive
    /// members of an exclusive union read as `Null`. Names that a pointer
    /// does not have are looked up on its target.
    pub fn get(&mut self, object: ObjectId, name: &str) -> Result<Value, MarshalError> {
        let structure = self.describe(object)?;
        if structure.kind == StructureKind::Pointer && structure.member(name).is_none() {
            let target = self.deref(object)?;
            return self.get(target, name);
        }
        let index = self.member_index(object, name)?;
        if !self.is_accessible(object, index)? {
            return Ok(Value::Null);
        }
        self.member_value(object, index)
    }

    /// Writes a member by name. Writing an inactive member of an exclusive
    /// union fails; assign the whole union to switch members.
    pub fn set(&mut self, object: ObjectId, name: &str, value: impl Into<Value>) -> Result<(), MarshalError> {
        let value = value.into();
        let structure = self.describe(object)?;
        if structure.kind == StructureKind::Pointer && structure.member(name).is_none() {
            let target = self.deref(object)?;
            return self.set(target, name, value);
        }
        let index = self.member_index(object, name)?;
        if !self.is_accessible(object, index)? {
            let structure = self.describe(object)?;
            return Err(MarshalError::InactiveUnionMember {
                structure: structure.name.clone(),
                member: name.to_string(),
            });
        }
        self.set_member(object, index, value)
    }

    fn deref(&mut self, pointer: ObjectId) -> Result<ObjectId, MarshalError> {
        match self.target(pointer)? {
            Some(target) => Ok(target),
            None => Err(MarshalError::InvalidType {
                expected: self.describe(pointer)?.name.clone(),
                found: "null".to_string(),
            }),
        }
    }

    /// Whether a member may be read or written: always, except for the
    /// inactive variants of an exclusive union.
    fn is_accessible(&self, object: ObjectId, index: usize) -> Result<bool, MarshalError> {
        let structure = self.describe(object)?;
        if !structure.kind.is_exclusive_union() || index + 1 == structure.members.len() {
            return Ok(true);
        }
        Ok(self.active_variant(object)? == Some(index))
    }

    /// Index of the active variant of an exclusive union, from its selector.
    pub(crate) fn active_variant(&self, object: ObjectId) -> Result<Option<usize>, MarshalError> {
        let structure = self.describe(object)?;
        let (selector, member) = selector_member(structure)?;
        let plan = self.plan(self.structure_of(object)?)?;
        let raw = self
            .read_scalar(object, &plan.members[selector], 0)?
            .as_i128()
            .unwrap_or(-1);
        let variant = match structure.kind {
            StructureKind::TaggedUnion => {
                let tag = member.structure.map(|s| self.item_table(s)).transpose()?;
                tag.and_then(|table| table.by_value(raw).map(|item| item.name.clone()))
                    .and_then(|name| structure.member(&name).map(|(index, _)| index))
                    .filter(|&index| index < selector)
            }
            _ => usize::try_from(raw).ok().filter(|&index| index < selector),
        };
        Ok(variant)
    }

    /// Reads member `index` without union checks.
    pub(crate) fn member_value(&mut self, object: ObjectId, index: usize) -> Result<Value, MarshalError> {
        let structure = self.describe(object)?;
        let member = &structure.members[index];
        let (member_type, member_structure) = (member.member_type, member.structure);
        let plan = self.plan(self.structure_of(object)?)?;
        match member_type {
            MemberType::Void => Ok(Value::Void),
            MemberType::Type => Ok(member_structure.map_or(Value::Void, Value::Type)),
            MemberType::Bool | MemberType::Int | MemberType::Float => {
                Ok(self.read_scalar(object, &plan.members[index], 0)?.into())
            }
            MemberType::EnumerationItem => {
                let raw = self.read_raw(object, &plan.members[index], 0)?;
                let set = member_structure.ok_or(MarshalError::InvalidObject(object))?;
                Ok(Value::Object(self.enum_from_raw(set, raw)?))
            }
            MemberType::Error => {
                let number = self.read_raw(object, &plan.members[index], 0)?;
                if number == 0 {
                    return Ok(Value::Null);
                }
                let set = member_structure.ok_or(MarshalError::InvalidObject(object))?;
                Ok(Value::Object(self.error_from_number(set, number)?.1))
            }
            MemberType::Object => {
                let child = self.child(object, index)?;
                self.object_value(child)
            }
        }
    }

    /// What a child object reads as when accessed through its parent.
    pub(crate) fn object_value(&mut self, child: ObjectId) -> Result<Value, MarshalError> {
        match self.describe(child)?.kind {
            StructureKind::Primitive
            | StructureKind::Optional
            | StructureKind::ErrorUnion
            | StructureKind::Enumeration
            | StructureKind::ErrorSet => self.value(child),
            _ => Ok(Value::Object(child)),
        }
    }

    pub(crate) fn read_raw(
        &self,
        object: ObjectId,
        member: &crate::plan::MemberPlan,
        base: usize,
    ) -> Result<i128, MarshalError> {
        let scalar = self.read_scalar(object, member, base)?;
        scalar.as_i128().ok_or_else(|| MarshalError::Overflow {
            value: format!("{:?}", scalar),
            bits: 128,
            signed: true,
        })
    }

    /// Writes member `index` without union checks.
    pub(crate) fn set_member(&mut self, object: ObjectId, index: usize, value: Value) -> Result<(), MarshalError> {
        let structure = self.describe(object)?;
        let member = &structure.members[index];
        let (member_type, member_structure, member_name) = (member.member_type, member.structure, member.name.clone());
        let plan = self.plan(self.structure_of(object)?)?;
        match member_type {
            MemberType::Void => match value {
                Value::Void | Value::Null => Ok(()),
                other => Err(MarshalError::InvalidType {
                    expected: "void".to_string(),
                    found: other.describe(),
                }),
            },
            MemberType::Type => Err(MarshalError::InvalidType {
                expected: format!("a runtime value for {}", member_name),
                found: value.describe(),
            }),
            MemberType::Bool | MemberType::Int | MemberType::Float => {
                let scalar = value.to_scalar().ok_or_else(|| MarshalError::InvalidType {
                    expected: format!("{:?}", member_type).to_lowercase(),
                    found: value.describe(),
                })?;
                self.write_scalar(object, &plan.members[index], 0, &scalar)
            }
            MemberType::EnumerationItem => {
                let set = member_structure.ok_or(MarshalError::InvalidObject(object))?;
                let raw = self.enum_to_raw(set, &value)?;
                self.write_scalar(object, &plan.members[index], 0, &Scalar::Int(raw))
            }
            MemberType::Error => {
                let set = member_structure.ok_or(MarshalError::InvalidObject(object))?;
                let number = match value {
                    Value::Null => 0,
                    other => self.error_number(set, &other)?,
                };
                self.write_scalar(object, &plan.members[index], 0, &Scalar::Int(number))
            }
            MemberType::Object => {
                let child = self.child(object, index)?;
                self.assign(child, value)
            }
        }
    }

    /// Zeroes the bytes of member `index` and forgets the pointers inside it.
    fn clear_member(&mut self, object: ObjectId, index: usize) -> Result<(), MarshalError> {
        let structure = self.describe(object)?;
        let member = &structure.members[index];
        let member_type = member.member_type;
        match (member.byte_size, member.bit_offset) {
            (Some(size), Some(bit_offset)) if bit_offset % 8 == 0 => {
                let offset = bit_offset / 8;
                let bytes = self.bytes_mut(object)?;
                let end = (offset + size).min(bytes.len());
                bytes[offset.min(end)..end].fill(0);
            }
            _ if member_type.is_scalar() => {
                let zero = match member_type {
                    MemberType::Bool => Scalar::Bool(false),
                    MemberType::Float => Scalar::Float(0.0),
                    _ => Scalar::Int(0),
                };
                let plan = self.plan(self.structure_of(object)?)?;
                self.write_scalar(object, &plan.members[index], 0, &zero)?;
            }
            _ => {}
        }
        if member_type == MemberType::Object {
            let child = self.child(object, index)?;
            let child_structure = self.describe(child)?;
            if child_structure.kind == StructureKind::Pointer || child_structure.has_pointer {
                self.reset_pointers(child)?;
            }
        }
        Ok(())
    }

    /// Reads the whole value of an object.
    ///
    /// Structs give a `Record`, arrays and slices a `List`, enumerations
    /// their item, pointers their target (or `Null`). Nested aggregates stay
    /// objects.
    pub fn value(&mut self, object: ObjectId) -> Result<Value, MarshalError> {
        let structure = self.describe(object)?;
        let kind = structure.kind;
        let names: Vec<String> = structure.members.iter().map(|m| m.name.clone()).collect();
        match kind {
            StructureKind::Primitive => self.member_value(object, 0),
            StructureKind::Enumeration | StructureKind::ErrorSet => {
                let plan = self.plan(self.structure_of(object)?)?;
                let raw = self.read_raw(object, &plan.members[0], 0)?;
                let structure = self.structure_of(object)?;
                if kind == StructureKind::Enumeration {
                    Ok(Value::Object(self.enum_from_raw(structure, raw)?))
                } else {
                    Ok(Value::Object(self.error_from_number(structure, raw)?.1))
                }
            }
            StructureKind::Struct | StructureKind::ArgStruct | StructureKind::ExternUnion => {
                let mut fields = Vec::with_capacity(names.len());
                for (index, name) in names.into_iter().enumerate() {
                    let value = self.member_value(object, index)?;
                    fields.push((name, value));
                }
                Ok(Value::Record(fields))
            }
            StructureKind::BareUnion | StructureKind::TaggedUnion => match self.active_variant(object)? {
                Some(index) => {
                    let value = self.member_value(object, index)?;
                    Ok(Value::Record(vec![(names[index].clone(), value)]))
                }
                None => Ok(Value::Null),
            },
            StructureKind::Optional => {
                if self.is_present(object)? {
                    self.member_value(object, 0)
                } else {
                    Ok(Value::Null)
                }
            }
            StructureKind::ErrorUnion => {
                let plan = self.plan(self.structure_of(object)?)?;
                let number = self.read_raw(object, &plan.members[1], 0)?;
                if number != 0 {
                    let set = structure_member_set(self, object)?;
                    let (name, item) = self.error_from_number(set, number)?;
                    return Err(MarshalError::ErrorReturned { name, number, item });
                }
                self.member_value(object, 0)
            }
            StructureKind::Array | StructureKind::Slice => {
                let items: Result<Vec<Value>, MarshalError> = self.elements(object)?.collect();
                Ok(Value::List(items?))
            }
            StructureKind::Pointer => Ok(self.target(object)?.map_or(Value::Null, Value::Object)),
        }
    }

    /// Replaces the whole value of an object.
    ///
    /// Accepts an object of the same structure (bytes and pointer targets
    /// are copied), `Record`s for structs and unions, `List`s for arrays and
    /// slices, `Null` for optionals and pointers, and plain values for
    /// primitives and payloads.
    pub fn assign(&mut self, object: ObjectId, value: impl Into<Value>) -> Result<(), MarshalError> {
        let value = value.into();
        let structure_index = self.structure_of(object)?;
        if let Value::Object(source) = value {
            if self.structure_of(source)? == structure_index && source != object {
                return self.copy_object(source, object);
            }
        }
        let structure = self.describe(object)?;
        let kind = structure.kind;
        let name = structure.name.clone();
        match kind {
            StructureKind::Primitive => self.set_member(object, 0, value),
            StructureKind::Enumeration => {
                let raw = self.enum_to_raw(structure_index, &value)?;
                let plan = self.plan(structure_index)?;
                self.write_scalar(object, &plan.members[0], 0, &Scalar::Int(raw))
            }
            StructureKind::ErrorSet => {
                let number = self.error_number(structure_index, &value)?;
                let plan = self.plan(structure_index)?;
                self.write_scalar(object, &plan.members[0], 0, &Scalar::Int(number))
            }
            StructureKind::Struct | StructureKind::ArgStruct | StructureKind::ExternUnion => match value {
                Value::Record(fields) => {
                    for (field, value) in fields {
                        self.set(object, &field, value)?;
                    }
                    Ok(())
                }
                other => Err(MarshalError::InvalidType {
                    expected: name,
                    found: other.describe(),
                }),
            },
            // these zero the old payload before writing the new one
            StructureKind::BareUnion | StructureKind::TaggedUnion => {
                self.with_rollback(object, |env| env.assign_union(object, value))
            }
            StructureKind::Optional => self.with_rollback(object, |env| env.assign_optional(object, value)),
            StructureKind::ErrorUnion => self.with_rollback(object, |env| env.assign_error_union(object, value)),
            StructureKind::Array => match value {
                Value::List(items) => {
                    let length = self.length(object)?;
                    if items.len() != length {
                        let element_size = self.plan(structure_index)?.element_size;
                        return Err(MarshalError::SizeMismatch {
                            structure: name,
                            expected: length * element_size,
                            actual: items.len() * element_size,
                        });
                    }
                    for (index, item) in items.into_iter().enumerate() {
                        self.set_index(object, index, item)?;
                    }
                    Ok(())
                }
                other => Err(MarshalError::InvalidType {
                    expected: name,
                    found: other.describe(),
                }),
            },
            StructureKind::Slice => match value {
                Value::List(items) => {
                    self.resize_slice(object, items.len())?;
                    for (index, item) in items.into_iter().enumerate() {
                        self.set_index(object, index, item)?;
                    }
                    Ok(())
                }
                other => Err(MarshalError::InvalidType {
                    expected: name,
                    found: other.describe(),
                }),
            },
            StructureKind::Pointer => self.assign_pointer(object, value),
        }
    }

    /// Switches an exclusive union to the variant named in a one-field
    /// record. The union is zeroed first.
    fn assign_union(&mut self, object: ObjectId, value: Value) -> Result<(), MarshalError> {
        let structure = self.describe(object)?;
        let name = structure.name.clone();
        let kind = structure.kind;
        let (selector, selector_def) = selector_member(structure)?;
        let tag_set = selector_def.structure;
        let (field, value) = match value {
            Value::Record(mut fields) if fields.len() == 1 => fields.remove(0),
            other => {
                return Err(MarshalError::InvalidType {
                    expected: format!("{} with exactly one field", name),
                    found: other.describe(),
                })
            }
        };
        let variant = match structure.member(&field) {
            Some((index, _)) if index < selector => index,
            _ => {
                return Err(MarshalError::NoProperty {
                    structure: name,
                    name: field,
                })
            }
        };
        self.bytes_mut(object)?.fill(0);
        if self.describe(object)?.has_pointer {
            self.reset_pointers(object)?;
        }
        let selector_value = match (kind, tag_set) {
            (StructureKind::TaggedUnion, Some(set)) => self.enum_to_raw(set, &Value::Str(field))?,
            _ => variant as i128,
        };
        let plan = self.plan(self.structure_of(object)?)?;
        self.write_scalar(object, &plan.members[selector], 0, &Scalar::Int(selector_value))?;
        self.set_member(object, variant, value)
    }

    /// Whether an optional holds a value.
    pub(crate) fn is_present(&mut self, object: ObjectId) -> Result<bool, MarshalError> {
        let structure = self.describe(object)?;
        if presence_member(structure).is_some() {
            let plan = self.plan(self.structure_of(object)?)?;
            return Ok(self.read_scalar(object, &plan.members[1], 0)?.as_bool());
        }
        let payload = self.child(object, 0)?;
        Ok(self.target(payload)?.is_some())
    }

    fn assign_optional(&mut self, object: ObjectId, value: Value) -> Result<(), MarshalError> {
        let has_flag = presence_member(self.describe(object)?).is_some();
        self.clear_member(object, 0)?;
        let present = !value.is_null();
        if present {
            self.set_member(object, 0, value)?;
        }
        if has_flag {
            let plan = self.plan(self.structure_of(object)?)?;
            self.write_scalar(object, &plan.members[1], 0, &Scalar::Bool(present))?;
        }
        Ok(())
    }

    fn assign_error_union(&mut self, object: ObjectId, value: Value) -> Result<(), MarshalError> {
        let set = structure_member_set(self, object)?;
        let is_error = match &value {
            Value::Object(item) => self.describe(*item)?.kind == StructureKind::ErrorSet,
            _ => false,
        };
        let plan = self.plan(self.structure_of(object)?)?;
        self.clear_member(object, 0)?;
        if is_error {
            let number = self.error_number(set, &value)?;
            self.write_scalar(object, &plan.members[1], 0, &Scalar::Int(number))
        } else {
            self.write_scalar(object, &plan.members[1], 0, &Scalar::Int(0))?;
            self.set_member(object, 0, value)
        }
    }

    fn assign_pointer(&mut self, pointer: ObjectId, value: Value) -> Result<(), MarshalError> {
        match value {
            Value::Null => self.set_target(pointer, None),
            Value::Object(target) => self.set_target(pointer, Some(target)),
            other => {
                // build a fresh target from a plain initializer
                let target_structure = strata_layout::helpers::pointer_target(self.describe(pointer)?)?;
                let ctor = self.constructor(target_structure)?;
                let target = self.construct(ctor, Some(other))?;
                self.set_target(pointer, Some(target))
            }
        }
    }
}

/// Error set referenced by an error union's error member.
fn structure_member_set(env: &Environment, object: ObjectId) -> Result<strata_layout::StructureIndex, MarshalError> {
    let structure = env.describe(object)?;
    let member = strata_layout::helpers::error_member(structure)?;
    member.structure.ok_or_else(|| {
        strata_layout::LayoutError::MissingMemberStructure(structure.name.clone(), member.name.clone()).into()
    })
}
