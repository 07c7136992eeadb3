//! Enumeration and error-set singletons.

use crate::env::{Constructor, Environment};
use crate::error::MarshalError;
use crate::value::{ObjectId, Value};
use std::rc::Rc;
use strata_layout::StructureIndex;
use strata_mem::Scalar;

/// One predefined item of an enumeration or error set.
#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub name: String,
    pub value: i128,
    pub object: ObjectId,
}

/// Item lookup table. Dense tables (values `0..n` in order) are indexed
/// directly; sparse ones are scanned.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemTable {
    pub items: Vec<Item>,
    pub dense: bool,
}

impl ItemTable {
    pub fn by_value(&self, raw: i128) -> Option<&Item> {
        if self.dense {
            usize::try_from(raw).ok().and_then(|index| self.items.get(index))
        } else {
            self.items.iter().find(|item| item.value == raw)
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn by_object(&self, object: ObjectId) -> Option<&Item> {
        self.items.iter().find(|item| item.object == object)
    }
}

impl Environment {
    /// Creates the singleton objects of a just-finalized enumeration or
    /// error set, each over its own small buffer holding the raw value.
    pub(crate) fn build_items(&mut self, structure: StructureIndex) -> Result<(), MarshalError> {
        let definition = self.structure(structure)?;
        let size = definition.byte_size;
        let raw_items: Vec<(String, i128)> =
            definition.items.iter().map(|item| (item.name.clone(), item.value)).collect();
        let plan = self.plan(structure)?;
        let value_member = plan
            .members
            .first()
            .ok_or_else(|| strata_layout::LayoutError::MissingMember(definition.name.clone(), "value".to_string()))?;
        let setter = value_member.setter.clone().ok_or_else(|| MarshalError::InvalidType {
            expected: "integer value member".to_string(),
            found: definition.name.clone(),
        })?;

        let mut table = ItemTable {
            items: Vec::with_capacity(raw_items.len()),
            dense: true,
        };
        for (index, (name, value)) in raw_items.into_iter().enumerate() {
            let mut bytes = vec![0u8; size];
            setter(&mut bytes, value_member.byte_offset, &Scalar::Int(value))?;
            let buffer = self.memory.create_buffer(bytes);
            let view = self.memory.obtain_view(buffer, 0, size)?;
            let object = self.instance_for(structure, view)?;
            table.dense &= value == index as i128;
            table.items.push(Item { name, value, object });
        }
        log::debug!(
            "created {} items for structure #{} ({})",
            table.items.len(),
            structure,
            if table.dense { "dense" } else { "sparse" }
        );
        self.items.insert(structure, Rc::new(table));
        Ok(())
    }

    pub(crate) fn item_table(&self, structure: StructureIndex) -> Result<Rc<ItemTable>, MarshalError> {
        match self.items.get(&structure) {
            Some(table) => Ok(table.clone()),
            None => {
                let definition = self.structure(structure)?;
                Err(MarshalError::InvalidType {
                    expected: "enumeration or error set".to_string(),
                    found: definition.name.clone(),
                })
            }
        }
    }

    /// Maps a raw value onto the matching item, as calling the type with a
    /// number does. Unknown values give `None`.
    pub fn call_type(&self, ctor: Constructor, raw: i128) -> Result<Option<ObjectId>, MarshalError> {
        let table = self.item_table(ctor.structure)?;
        Ok(table.by_value(raw).map(|item| item.object))
    }

    /// Gets the item with the given name.
    pub fn item(&self, ctor: Constructor, name: &str) -> Result<ObjectId, MarshalError> {
        let table = self.item_table(ctor.structure)?;
        match table.by_name(name) {
            Some(item) => Ok(item.object),
            None => Err(MarshalError::InvalidEnum {
                structure: self.structure(ctor.structure)?.name.clone(),
                value: name.to_string(),
            }),
        }
    }

    /// Gets the name of an item.
    pub fn item_name(&self, item: ObjectId) -> Result<String, MarshalError> {
        let structure = self.structure_of(item)?;
        let table = self.item_table(structure)?;
        table
            .by_object(item)
            .map(|entry| entry.name.clone())
            .ok_or(MarshalError::InvalidObject(item))
    }

    /// Gets the raw value of an item.
    pub fn item_value(&self, item: ObjectId) -> Result<i128, MarshalError> {
        let structure = self.structure_of(item)?;
        let table = self.item_table(structure)?;
        table
            .by_object(item)
            .map(|entry| entry.value)
            .ok_or(MarshalError::InvalidObject(item))
    }

    /// Maps the raw value read from an enumeration member to its item.
    pub(crate) fn enum_from_raw(&self, structure: StructureIndex, raw: i128) -> Result<ObjectId, MarshalError> {
        let table = self.item_table(structure)?;
        match table.by_value(raw) {
            Some(item) => Ok(item.object),
            None => Err(MarshalError::InvalidEnum {
                structure: self.structure(structure)?.name.clone(),
                value: raw.to_string(),
            }),
        }
    }

    /// Converts a host value into the raw value of an item of `structure`.
    /// Accepts an item object, an item name or a raw number naming an item.
    pub(crate) fn enum_to_raw(&self, structure: StructureIndex, value: &Value) -> Result<i128, MarshalError> {
        let table = self.item_table(structure)?;
        let name = || self.structure(structure).map(|s| s.name.clone());
        let found = match value {
            Value::Object(object) => table.by_object(*object),
            Value::Str(item) => match table.by_name(item) {
                Some(entry) => Some(entry),
                None => {
                    return Err(MarshalError::InvalidEnum {
                        structure: name()?,
                        value: item.clone(),
                    })
                }
            },
            other => match other.as_i128() {
                Some(raw) => match table.by_value(raw) {
                    Some(entry) => Some(entry),
                    None => {
                        return Err(MarshalError::InvalidEnum {
                            structure: name()?,
                            value: raw.to_string(),
                        })
                    }
                },
                None => None,
            },
        };
        match found {
            Some(item) => Ok(item.value),
            None => Err(MarshalError::EnumExpected {
                structure: name()?,
                found: value.describe(),
            }),
        }
    }

    /// Looks up an error of `set` by number. Unknown numbers are reported
    /// rather than mapped to `None`.
    pub(crate) fn error_from_number(&self, set: StructureIndex, number: i128) -> Result<(String, ObjectId), MarshalError> {
        let table = self.item_table(set)?;
        match table.by_value(number) {
            Some(item) => Ok((item.name.clone(), item.object)),
            None => Err(MarshalError::UnknownErrorNumber {
                structure: self.structure(set)?.name.clone(),
                number,
            }),
        }
    }

    /// Gets the number of an error item, checking that it belongs to `set`.
    /// Errors from other sets are accepted when `set` has an error with the
    /// same number.
    pub(crate) fn error_number(&self, set: StructureIndex, value: &Value) -> Result<i128, MarshalError> {
        let table = self.item_table(set)?;
        let set_name = || self.structure(set).map(|s| s.name.clone());
        let number = match value {
            Value::Object(object) => {
                let owner = self.structure_of(*object)?;
                let owner_table = self.item_table(owner)?;
                let item = owner_table.by_object(*object).ok_or_else(|| MarshalError::InvalidType {
                    expected: "error".to_string(),
                    found: object.to_string(),
                })?;
                item.value
            }
            Value::Str(name) => match table.by_name(name) {
                Some(item) => item.value,
                None => {
                    return Err(MarshalError::NotInErrorSet {
                        structure: set_name()?,
                        error: name.clone(),
                    })
                }
            },
            other => other.as_i128().ok_or_else(|| MarshalError::InvalidType {
                expected: "error".to_string(),
                found: other.describe(),
            })?,
        };
        if table.by_value(number).is_none() {
            return Err(MarshalError::NotInErrorSet {
                structure: set_name()?,
                error: match value {
                    Value::Object(object) => self.item_name(*object)?,
                    _ => number.to_string(),
                },
            });
        }
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: &[i128]) -> ItemTable {
        let items: Vec<Item> = values
            .iter()
            .enumerate()
            .map(|(index, &value)| Item {
                name: format!("item{}", index),
                value,
                object: ObjectId(index as u32),
            })
            .collect();
        let dense = items.iter().enumerate().all(|(index, item)| item.value == index as i128);
        ItemTable { items, dense }
    }

    #[test]
    fn test_dense_lookup() {
        let table = table(&[0, 1, 2]);
        assert!(table.dense);
        assert_eq!(table.by_value(1).map(|i| i.object), Some(ObjectId(1)));
        assert!(table.by_value(3).is_none());
        assert!(table.by_value(-1).is_none());
    }

    #[test]
    fn test_sparse_lookup() {
        let table = table(&[123, 456]);
        assert!(!table.dense);
        assert_eq!(table.by_value(456).map(|i| i.name.as_str()), Some("item1"));
        assert!(table.by_value(1).is_none());
        assert_eq!(table.by_name("item0").map(|i| i.value), Some(123));
    }
}
