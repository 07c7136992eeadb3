//! Object records and constructors.

use crate::env::{Constructor, Environment};
use crate::error::MarshalError;
use crate::value::{ObjectId, Value};
use once_cell::unsync::OnceCell;
use strata_layout::{MemberType, StructureIndex, StructureKind};
use strata_mem::{Address, ViewId};

/// Bytes and cached pointer targets of an object, taken before a write
/// that may fail halfway.
#[derive(Debug)]
pub(crate) struct Snapshot {
    object: ObjectId,
    bytes: Vec<u8>,
    targets: Vec<(ObjectId, Option<ObjectId>)>,
}

/// Per-instance state: which structure the object is, which bytes it covers
/// and its lazily filled child slots.
#[derive(Debug)]
pub(crate) struct ObjectRecord {
    pub structure: StructureIndex,
    pub view: ViewId,
    pub slots: Vec<OnceCell<ObjectId>>,
}

impl Environment {
    /// Number of slots an instance over `byte_len` bytes needs. Arrays and
    /// slices of objects use one slot per element.
    pub(crate) fn slot_count(&self, structure: StructureIndex, byte_len: usize) -> Result<usize, MarshalError> {
        let definition = self.structure(structure)?;
        let plan = self.plan(structure)?;
        if definition.kind.has_elements() && definition.members[0].member_type == MemberType::Object {
            Ok(plan.element_count(byte_len))
        } else {
            Ok(plan.slot_count)
        }
    }

    pub(crate) fn new_object(&mut self, structure: StructureIndex, view: ViewId) -> Result<ObjectId, MarshalError> {
        let len = self.memory.info(view)?.len;
        let slots = (0..self.slot_count(structure, len)?).map(|_| OnceCell::new()).collect();
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(ObjectRecord { structure, view, slots });
        self.instances.insert((structure, view), id);
        log::trace!("new object {} of structure #{} over {}", id, structure, view);
        Ok(id)
    }

    /// Gets the object of `structure` over `view`, creating it on first use.
    pub(crate) fn instance_for(&mut self, structure: StructureIndex, view: ViewId) -> Result<ObjectId, MarshalError> {
        match self.instances.get(&(structure, view)) {
            Some(&object) => Ok(object),
            None => self.new_object(structure, view),
        }
    }

    /// Allocates zeroed bytes for a fresh instance, inside fixed memory when
    /// objects are configured to be resident.
    fn allocate_instance(&mut self, len: usize, align: usize) -> Result<ViewId, MarshalError> {
        let buffer = if self.options.memory.resident {
            self.memory.create_resident_buffer(len, align)?
        } else {
            self.memory.create_buffer(vec![0; len])
        };
        Ok(self.memory.obtain_view(buffer, 0, len)?)
    }

    /// Creates a fresh instance: zeroed bytes, then the template, then the
    /// initializer. Enumerations and error sets cannot be constructed.
    pub fn construct(&mut self, ctor: Constructor, init: Option<Value>) -> Result<ObjectId, MarshalError> {
        let definition = self.structure(ctor.structure)?;
        match definition.kind {
            StructureKind::Enumeration => return Err(MarshalError::NoNewEnum(definition.name.clone())),
            StructureKind::ErrorSet => return Err(MarshalError::NoNewError(definition.name.clone())),
            _ => {}
        }
        let len = match (definition.kind, &init) {
            (StructureKind::Slice, Some(Value::List(items))) => items.len() * definition.byte_size,
            (StructureKind::Slice, _) => 0,
            _ => definition.byte_size,
        };
        let align = definition.align;
        let template = definition.template.as_ref().map(|t| t.bytes.clone());
        let has_pointer = definition.has_pointer;

        let view = self.allocate_instance(len, align)?;
        let object = self.new_object(ctor.structure, view)?;
        if let Some(bytes) = template.filter(|bytes| bytes.len() == len) {
            self.bytes_mut(object)?.copy_from_slice(&bytes);
            if has_pointer {
                self.reset_pointers(object)?;
            }
        }
        match init {
            None | Some(Value::Void) => {}
            Some(value) => self.assign(object, value)?,
        }
        Ok(object)
    }

    /// Checks that `len` bytes can hold an instance of `structure`.
    fn check_size(&self, structure: StructureIndex, len: usize) -> Result<(), MarshalError> {
        let definition = self.structure(structure)?;
        let fits = match definition.kind {
            StructureKind::Slice => definition.byte_size == 0 || len % definition.byte_size == 0,
            _ => len == definition.byte_size,
        };
        if fits {
            Ok(())
        } else {
            Err(MarshalError::SizeMismatch {
                structure: definition.name.clone(),
                expected: definition.byte_size,
                actual: len,
            })
        }
    }

    /// Wraps existing bytes. Casting the same view twice gives the same object.
    pub fn cast(&mut self, ctor: Constructor, view: ViewId) -> Result<ObjectId, MarshalError> {
        let len = self.memory.info(view)?.len;
        self.check_size(ctor.structure, len)?;
        self.instance_for(ctor.structure, view)
    }

    /// Wraps a byte vector in a new relocatable buffer.
    pub fn cast_bytes(&mut self, ctor: Constructor, bytes: Vec<u8>) -> Result<ObjectId, MarshalError> {
        let len = bytes.len();
        self.check_size(ctor.structure, len)?;
        let buffer = self.memory.create_buffer(bytes);
        let view = self.memory.obtain_view(buffer, 0, len)?;
        self.instance_for(ctor.structure, view)
    }

    /// Wraps `len` bytes of fixed memory at `address`.
    pub fn cast_address(&mut self, ctor: Constructor, address: Address, len: usize) -> Result<ObjectId, MarshalError> {
        self.check_size(ctor.structure, len)?;
        let view = self.memory.obtain_fixed_view(address, len)?;
        self.instance_for(ctor.structure, view)
    }

    /// Gets the object held by an Object member, creating it over the
    /// member's bytes on first access.
    pub(crate) fn child(&mut self, object: ObjectId, member_index: usize) -> Result<ObjectId, MarshalError> {
        let record = self.record(object)?;
        let parent_view = record.view;
        let definition = self.structure(record.structure)?;
        let member = &definition.members[member_index];
        let slot = member.slot;
        if let Some(child) = slot.and_then(|slot| record.slots.get(slot)).and_then(|cell| cell.get()) {
            return Ok(*child);
        }
        let child_structure = member.structure.ok_or_else(|| {
            strata_layout::LayoutError::MissingMemberStructure(definition.name.clone(), member.name.clone())
        })?;
        let (offset, len) = (member.byte_offset(), member.byte_size.unwrap_or(0));
        let view = self.memory.subview(parent_view, offset, len)?;
        let child = self.instance_for(child_structure, view)?;
        if let Some(slot) = slot {
            if let Some(cell) = self.record(object)?.slots.get(slot) {
                let _ = cell.set(child);
            }
        }
        Ok(child)
    }

    /// Gets the object at `index` of an array or slice of objects.
    pub(crate) fn element_child(&mut self, object: ObjectId, index: usize) -> Result<ObjectId, MarshalError> {
        let record = self.record(object)?;
        if let Some(child) = record.slots.get(index).and_then(|cell| cell.get()) {
            return Ok(*child);
        }
        let (structure, parent_view) = (record.structure, record.view);
        let definition = self.structure(structure)?;
        let element_structure = definition.members[0].structure.ok_or_else(|| {
            strata_layout::LayoutError::MissingMemberStructure(definition.name.clone(), definition.members[0].name.clone())
        })?;
        let size = self.plan(structure)?.element_size;
        let view = self.memory.subview(parent_view, index * size, size)?;
        let child = self.instance_for(element_structure, view)?;
        if let Some(cell) = self.record(object)?.slots.get(index) {
            let _ = cell.set(child);
        }
        Ok(child)
    }

    /// Child objects that hold pointers: pointer-bearing members of records
    /// and unions, every element of pointer-bearing arrays.
    pub(crate) fn pointer_children(&mut self, object: ObjectId) -> Result<Vec<ObjectId>, MarshalError> {
        let structure = self.structure_of(object)?;
        let kind = self.structure(structure)?.kind;
        let plan = self.plan(structure)?;
        if plan.pointer_members.is_empty() {
            return Ok(Vec::new());
        }
        if kind.has_elements() {
            let count = self.length(object)?;
            (0..count).map(|index| self.element_child(object, index)).collect()
        } else {
            plan.pointer_members.iter().map(|&member| self.child(object, member)).collect()
        }
    }

    /// Clears every pointer reachable from `object` without following
    /// pointers: the address bytes are zeroed and the cached targets dropped.
    pub(crate) fn reset_pointers(&mut self, object: ObjectId) -> Result<(), MarshalError> {
        if self.describe(object)?.kind == StructureKind::Pointer {
            return self.clear_pointer(object);
        }
        for child in self.pointer_children(object)? {
            self.reset_pointers(child)?;
        }
        Ok(())
    }

    /// Copies the cached pointer targets of `source` into `dest`, which has
    /// the same structure and has just received a copy of its bytes.
    pub(crate) fn copy_pointers(&mut self, source: ObjectId, dest: ObjectId) -> Result<(), MarshalError> {
        if self.describe(source)?.kind == StructureKind::Pointer {
            let target = self.cached_target(source)?;
            return self.store_target(dest, target);
        }
        let sources = self.pointer_children(source)?;
        let dests = self.pointer_children(dest)?;
        for (source, dest) in sources.into_iter().zip(dests) {
            self.copy_pointers(source, dest)?;
        }
        Ok(())
    }

    /// Copies the whole of `source` into `dest` along with its pointer
    /// targets.
    pub(crate) fn copy_object(&mut self, source: ObjectId, dest: ObjectId) -> Result<(), MarshalError> {
        let (from, to) = (self.record(source)?.view, self.record(dest)?.view);
        self.memory.copy_view(from, to)?;
        if self.describe(dest)?.has_pointer {
            self.copy_pointers(source, dest)?;
        }
        Ok(())
    }
}

impl Environment {
    pub(crate) fn snapshot(&mut self, object: ObjectId) -> Result<Snapshot, MarshalError> {
        let bytes = self.bytes(object)?.to_vec();
        let mut targets = Vec::new();
        let structure = self.describe(object)?;
        if structure.kind == StructureKind::Pointer || structure.has_pointer {
            self.collect_targets(object, &mut targets)?;
        }
        Ok(Snapshot { object, bytes, targets })
    }

    fn collect_targets(
        &mut self,
        object: ObjectId,
        targets: &mut Vec<(ObjectId, Option<ObjectId>)>,
    ) -> Result<(), MarshalError> {
        if self.describe(object)?.kind == StructureKind::Pointer {
            targets.push((object, self.cached_target(object)?));
            return Ok(());
        }
        for child in self.pointer_children(object)? {
            self.collect_targets(child, targets)?;
        }
        Ok(())
    }

    pub(crate) fn restore(&mut self, snapshot: Snapshot) -> Result<(), MarshalError> {
        self.bytes_mut(snapshot.object)?.copy_from_slice(&snapshot.bytes);
        for (pointer, target) in snapshot.targets {
            self.store_target(pointer, target)?;
        }
        Ok(())
    }

    /// Runs `write` on `object`, putting the object back the way it was if
    /// the write fails.
    pub(crate) fn with_rollback<F>(&mut self, object: ObjectId, write: F) -> Result<(), MarshalError>
    where
        F: FnOnce(&mut Environment) -> Result<(), MarshalError>,
    {
        let saved = self.snapshot(object)?;
        let result = write(self);
        if result.is_err() {
            log::trace!("rolling back failed write to {}", object);
            self.restore(saved)?;
        }
        result
    }
}
