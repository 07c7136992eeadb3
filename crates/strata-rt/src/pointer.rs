//! Pointer objects.
//!
//! A pointer keeps its target in slot 0. The slot is the source of truth on
//! the host side; the address bytes are the source of truth on the foreign
//! side. Synchronization moves one into the other around calls.

use crate::context::ShadowMapping;
use crate::env::Environment;
use crate::error::MarshalError;
use crate::value::ObjectId;
use once_cell::unsync::OnceCell;
use strata_layout::helpers::pointer_target;
use strata_layout::{StructureIndex, StructureKind};
use strata_mem::{Address, Scalar};

/// What a pointer points at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TargetInfo {
    pub structure: StructureIndex,
    pub is_slice: bool,
    /// Target size for single pointers, element size for slices.
    pub unit_size: usize,
    pub align: usize,
    pub is_const: bool,
}

impl Environment {
    pub(crate) fn target_info(&self, pointer: ObjectId) -> Result<TargetInfo, MarshalError> {
        let definition = self.describe(pointer)?;
        let is_const = definition.is_const;
        let structure = pointer_target(definition)?;
        let target = self.structures().get(structure)?;
        Ok(TargetInfo {
            structure,
            is_slice: target.kind == StructureKind::Slice,
            unit_size: target.byte_size,
            align: target.align,
            is_const,
        })
    }

    /// Address that marks memory the foreign side never initialized.
    fn uninitialized_address(&self) -> Address {
        match self.options.address_size {
            8 => 0xAAAA_AAAA_AAAA_AAAAu64 as Address,
            _ => 0xAAAA_AAAA,
        }
    }

    /// Reads the stored address and, for fat pointers, the element count.
    pub(crate) fn read_address(&self, pointer: ObjectId) -> Result<(Address, usize), MarshalError> {
        let plan = self.plan(self.structure_of(pointer)?)?;
        let field = plan.address.as_ref().ok_or_else(|| MarshalError::InvalidType {
            expected: "pointer".to_string(),
            found: pointer.to_string(),
        })?;
        let address = self.read_scalar(pointer, field, 0)?.as_u128().unwrap_or(0) as Address;
        let count = match &plan.count {
            Some(field) => self.read_scalar(pointer, field, 0)?.as_u128().unwrap_or(0) as usize,
            None => 1,
        };
        Ok((address, count))
    }

    pub(crate) fn write_address(&mut self, pointer: ObjectId, address: Address, count: usize) -> Result<(), MarshalError> {
        let plan = self.plan(self.structure_of(pointer)?)?;
        let field = plan.address.as_ref().ok_or_else(|| MarshalError::InvalidType {
            expected: "pointer".to_string(),
            found: pointer.to_string(),
        })?;
        self.write_scalar(pointer, field, 0, &Scalar::UInt(address as u128))?;
        if let Some(field) = &plan.count {
            self.write_scalar(pointer, field, 0, &Scalar::UInt(count as u128))?;
        }
        log::trace!("pointer {} <- {:#x} ({} elements)", pointer, address, count);
        Ok(())
    }

    /// Number of units a target covers: its length for slices, 1 otherwise.
    pub(crate) fn target_count(&self, target: ObjectId) -> Result<usize, MarshalError> {
        if self.describe(target)?.kind == StructureKind::Slice {
            self.length(target)
        } else {
            Ok(1)
        }
    }

    pub(crate) fn cached_target(&self, pointer: ObjectId) -> Result<Option<ObjectId>, MarshalError> {
        Ok(self.record(pointer)?.slots.first().and_then(|cell| cell.get()).copied())
    }

    pub(crate) fn store_target(&mut self, pointer: ObjectId, target: Option<ObjectId>) -> Result<(), MarshalError> {
        let record = self.record_mut(pointer)?;
        if let Some(cell) = record.slots.first_mut() {
            *cell = match target {
                Some(target) => OnceCell::with_value(target),
                None => OnceCell::new(),
            };
        }
        Ok(())
    }

    /// Gets the object a pointer points at, resolving it from the stored
    /// address when nothing is cached. Null pointers give `None`.
    pub fn target(&mut self, pointer: ObjectId) -> Result<Option<ObjectId>, MarshalError> {
        if let Some(target) = self.cached_target(pointer)? {
            return Ok(Some(target));
        }
        let target = self.resolve_address(pointer, &[])?;
        if let Some(target) = target {
            self.store_target(pointer, Some(target))?;
        }
        Ok(target)
    }

    /// Maps the stored address onto a target object. Shadow mappings
    /// (innermost first) are consulted before fixed memory.
    pub(crate) fn resolve_address(
        &mut self,
        pointer: ObjectId,
        mappings: &[ShadowMapping],
    ) -> Result<Option<ObjectId>, MarshalError> {
        let info = self.target_info(pointer)?;
        let (address, count) = self.read_address(pointer)?;
        if info.is_slice && count == 0 {
            let view = if address == 0 || address == self.uninitialized_address() {
                self.memory.empty_view()?
            } else {
                self.memory.obtain_fixed_view(address, 0)?
            };
            return Ok(Some(self.instance_for(info.structure, view)?));
        }
        if address == 0 {
            return Ok(None);
        }
        if address == self.uninitialized_address() {
            return Err(MarshalError::UninitializedPointer {
                structure: self.describe(pointer)?.name.clone(),
                address,
                count,
            });
        }
        // counts come from foreign memory
        let len = info.unit_size.checked_mul(count).ok_or(MarshalError::OutOfBounds {
            index: count,
            length: usize::MAX / info.unit_size.max(1),
        })?;
        let view = match mappings.iter().find(|mapping| mapping.contains(address, len)) {
            Some(mapping) => {
                let offset = mapping.offset + (address - mapping.address);
                self.memory.obtain_view(mapping.buffer, offset, len)?
            }
            None => self.memory.obtain_fixed_view(address, len)?,
        };
        Ok(Some(self.instance_for(info.structure, view)?))
    }

    /// Points `pointer` at `target`, or makes it null. The address is
    /// written right away when the target already has one; otherwise it is
    /// filled in when the pointer is synchronized for a call.
    pub fn set_target(&mut self, pointer: ObjectId, target: Option<ObjectId>) -> Result<(), MarshalError> {
        let info = self.target_info(pointer)?;
        let Some(target) = target else {
            self.store_target(pointer, None)?;
            return self.write_address(pointer, 0, 0);
        };
        let actual = self.structure_of(target)?;
        if actual != info.structure {
            return Err(MarshalError::InvalidType {
                expected: self.structure(info.structure)?.name.clone(),
                found: self.describe(target)?.name.clone(),
            });
        }
        self.store_target(pointer, Some(target))?;
        let count = self.target_count(target)?;
        let view = self.view_of(target)?;
        let address = self.memory.get_address(view).unwrap_or(0);
        self.write_address(pointer, address, count)
    }

    /// Makes a pointer null without touching its target.
    pub(crate) fn clear_pointer(&mut self, pointer: ObjectId) -> Result<(), MarshalError> {
        self.store_target(pointer, None)?;
        self.bytes_mut(pointer)?.fill(0);
        Ok(())
    }
}
