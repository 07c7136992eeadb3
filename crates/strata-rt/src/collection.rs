//! Arrays and slices.

use crate::env::Environment;
use crate::error::MarshalError;
use crate::value::{ObjectId, Value};
use once_cell::unsync::OnceCell;
use strata_layout::MemberType;
use strata_mem::Scalar;

impl Environment {
    fn element_kind(&self, object: ObjectId) -> Result<(MemberType, Option<usize>), MarshalError> {
        let structure = self.describe(object)?;
        let member = strata_layout::helpers::element_member(structure)?;
        Ok((member.member_type, member.structure))
    }

    /// Number of elements of an array or slice.
    pub fn length(&self, object: ObjectId) -> Result<usize, MarshalError> {
        let record = self.record(object)?;
        let structure = self.structure(record.structure)?;
        if !structure.kind.has_elements() {
            return Err(MarshalError::InvalidType {
                expected: "array or slice".to_string(),
                found: structure.name.clone(),
            });
        }
        let len = self.memory.info(record.view)?.len;
        Ok(self.plan(record.structure)?.element_count(len))
    }

    fn check_index(&self, object: ObjectId, index: usize) -> Result<(), MarshalError> {
        let length = self.length(object)?;
        if index >= length {
            return Err(MarshalError::OutOfBounds { index, length });
        }
        Ok(())
    }

    pub fn get_index(&mut self, object: ObjectId, index: usize) -> Result<Value, MarshalError> {
        self.check_index(object, index)?;
        let (member_type, set) = self.element_kind(object)?;
        let plan = self.plan(self.structure_of(object)?)?;
        let base = index * plan.element_size;
        match member_type {
            MemberType::Object => {
                let child = self.element_child(object, index)?;
                self.object_value(child)
            }
            MemberType::EnumerationItem => {
                let raw = self.read_raw(object, &plan.members[0], base)?;
                let set = set.ok_or(MarshalError::InvalidObject(object))?;
                Ok(Value::Object(self.enum_from_raw(set, raw)?))
            }
            MemberType::Error => {
                let number = self.read_raw(object, &plan.members[0], base)?;
                let set = set.ok_or(MarshalError::InvalidObject(object))?;
                Ok(Value::Object(self.error_from_number(set, number)?.1))
            }
            MemberType::Void | MemberType::Type => Ok(Value::Void),
            _ => Ok(self.read_scalar(object, &plan.members[0], base)?.into()),
        }
    }

    pub fn set_index(&mut self, object: ObjectId, index: usize, value: impl Into<Value>) -> Result<(), MarshalError> {
        let value = value.into();
        self.check_index(object, index)?;
        let (member_type, set) = self.element_kind(object)?;
        let plan = self.plan(self.structure_of(object)?)?;
        let base = index * plan.element_size;
        let scalar = match member_type {
            MemberType::Object => {
                let child = self.element_child(object, index)?;
                return self.assign(child, value);
            }
            MemberType::EnumerationItem => {
                let set = set.ok_or(MarshalError::InvalidObject(object))?;
                Scalar::Int(self.enum_to_raw(set, &value)?)
            }
            MemberType::Error => {
                let set = set.ok_or(MarshalError::InvalidObject(object))?;
                Scalar::Int(self.error_number(set, &value)?)
            }
            MemberType::Void | MemberType::Type => return Ok(()),
            _ => value.to_scalar().ok_or_else(|| MarshalError::InvalidType {
                expected: format!("{:?}", member_type).to_lowercase(),
                found: value.describe(),
            })?,
        };
        self.write_scalar(object, &plan.members[0], base, &scalar)
    }

    /// Iterates over the elements of an array or slice. Each call starts a
    /// new pass.
    pub fn elements(&mut self, object: ObjectId) -> Result<Elements<'_>, MarshalError> {
        let length = self.length(object)?;
        Ok(Elements {
            env: self,
            object,
            index: 0,
            length,
        })
    }

    /// Gives a slice room for `count` elements. Elements that fit in the new
    /// length keep their values; the object moves to the new bytes.
    pub(crate) fn resize_slice(&mut self, object: ObjectId, count: usize) -> Result<(), MarshalError> {
        if self.length(object)? == count {
            return Ok(());
        }
        let record = self.record(object)?;
        let (structure, old_view) = (record.structure, record.view);
        let definition = self.structure(structure)?;
        let align = definition.align;
        let len = count * self.plan(structure)?.element_size;

        let mut bytes = self.memory.view_bytes(old_view)?.to_vec();
        bytes.resize(len, 0);
        let buffer = if self.options.memory.resident {
            let buffer = self.memory.create_resident_buffer(len, align)?;
            let view = self.memory.obtain_view(buffer, 0, len)?;
            self.memory.view_bytes_mut(view)?.copy_from_slice(&bytes);
            buffer
        } else {
            self.memory.create_buffer(bytes)
        };
        let view = self.memory.obtain_view(buffer, 0, len)?;
        let slot_count = self.slot_count(structure, len)?;

        let record = self.record_mut(object)?;
        record.view = view;
        record.slots = (0..slot_count).map(|_| OnceCell::new()).collect();
        if self.instances.get(&(structure, old_view)) == Some(&object) {
            self.instances.remove(&(structure, old_view));
        }
        self.instances.insert((structure, view), object);
        log::trace!("slice {} resized to {} elements", object, count);
        Ok(())
    }
}

/// Cursor over the elements of an array or slice.
pub struct Elements<'a> {
    env: &'a mut Environment,
    object: ObjectId,
    index: usize,
    length: usize,
}

impl Iterator for Elements<'_> {
    type Item = Result<Value, MarshalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.length {
            return None;
        }
        let value = self.env.get_index(self.object, self.index);
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.length - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Elements<'_> {}
