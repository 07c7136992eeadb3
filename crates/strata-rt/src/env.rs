use crate::config::EnvOptions;
use crate::context::CallContext;
use crate::enums::ItemTable;
use crate::error::MarshalError;
use crate::object::ObjectRecord;
use crate::plan::{MemberPlan, StructurePlan};
use crate::value::ObjectId;
use rustc_hash::FxHashMap;
use std::rc::Rc;
use strata_layout::{Member, Structure, StructureDef, StructureIndex, StructureStore, Template};
use strata_mem::{AccessorFactory, LinearMemory, Scalar, ViewId, ViewRegistry};

/// Creates instances of one finalized structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constructor {
    pub(crate) structure: StructureIndex,
}

impl Constructor {
    pub fn structure(&self) -> StructureIndex {
        self.structure
    }
}

/// All state for one loaded module: structure descriptors, accessors, the
/// view registry, the object arena and the call context stack.
///
/// An environment is single-threaded; hosts running a module on several
/// threads create one environment per thread.
pub struct Environment {
    pub(crate) options: EnvOptions,
    pub(crate) store: StructureStore,
    pub(crate) accessors: AccessorFactory,
    pub(crate) memory: ViewRegistry,
    pub(crate) plans: FxHashMap<StructureIndex, Rc<StructurePlan>>,
    pub(crate) items: FxHashMap<StructureIndex, Rc<ItemTable>>,
    pub(crate) objects: Vec<ObjectRecord>,
    pub(crate) instances: FxHashMap<(StructureIndex, ViewId), ObjectId>,
    pub(crate) contexts: Vec<CallContext>,
    pub(crate) next_context: u32,
}

impl Environment {
    /// Creates an environment backed by a [`LinearMemory`] configured from
    /// `options.memory`.
    pub fn new(options: EnvOptions) -> Self {
        let memory = LinearMemory::with_max_size(
            options.memory.base_address,
            options.memory.initial_size,
            options.memory.max_size.max(options.memory.initial_size),
        );
        Self::with_registry(options, ViewRegistry::new(Box::new(memory)))
    }

    /// Creates an environment over a caller-supplied view registry.
    pub fn with_registry(options: EnvOptions, memory: ViewRegistry) -> Self {
        log::debug!(
            "new environment: byte_order={:?}, runtime_safety={}, address_size={}",
            options.byte_order,
            options.runtime_safety,
            options.address_size
        );
        Environment {
            accessors: AccessorFactory::new(options.byte_order(), options.runtime_safety),
            options,
            store: StructureStore::new(),
            memory,
            plans: FxHashMap::default(),
            items: FxHashMap::default(),
            objects: Vec::new(),
            instances: FxHashMap::default(),
            contexts: Vec::new(),
            next_context: 0,
        }
    }

    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    pub fn structures(&self) -> &StructureStore {
        &self.store
    }

    pub fn memory(&self) -> &ViewRegistry {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ViewRegistry {
        &mut self.memory
    }

    pub fn accessors(&self) -> &AccessorFactory {
        &self.accessors
    }

    pub fn begin_structure(&mut self, def: StructureDef) -> StructureIndex {
        self.store.begin_structure(def)
    }

    pub fn attach_member(&mut self, structure: StructureIndex, member: Member) -> Result<(), MarshalError> {
        Ok(self.store.attach_member(structure, member)?)
    }

    pub fn attach_item(&mut self, structure: StructureIndex, name: &str, value: i128) -> Result<(), MarshalError> {
        Ok(self.store.attach_item(structure, name, value)?)
    }

    pub fn attach_template(&mut self, structure: StructureIndex, template: Template) -> Result<(), MarshalError> {
        Ok(self.store.attach_template(structure, template)?)
    }

    /// Freezes a structure, derives its access plan and returns its
    /// constructor. Enumerations and error sets get their singleton items
    /// here.
    pub fn finalize_structure(&mut self, structure: StructureIndex) -> Result<Constructor, MarshalError> {
        self.store.finalize_structure(structure)?;
        let definition = self.store.get(structure)?;
        let plan = StructurePlan::build(definition, &self.store, &mut self.accessors, self.options.address_size)?;
        let singleton = definition.kind.is_singleton();
        self.plans.insert(structure, Rc::new(plan));
        if singleton {
            self.build_items(structure)?;
        }
        Ok(Constructor { structure })
    }

    /// Gets the constructor of a finalized structure.
    pub fn constructor(&self, structure: StructureIndex) -> Result<Constructor, MarshalError> {
        self.store.finalized(structure)?;
        Ok(Constructor { structure })
    }

    pub(crate) fn structure(&self, index: StructureIndex) -> Result<&Structure, MarshalError> {
        Ok(self.store.finalized(index)?)
    }

    pub(crate) fn plan(&self, index: StructureIndex) -> Result<Rc<StructurePlan>, MarshalError> {
        match self.plans.get(&index) {
            Some(plan) => Ok(plan.clone()),
            None => Err(strata_layout::LayoutError::NotFinalized(self.store.get(index)?.name.clone()).into()),
        }
    }

    pub(crate) fn record(&self, object: ObjectId) -> Result<&ObjectRecord, MarshalError> {
        self.objects.get(object.index()).ok_or(MarshalError::InvalidObject(object))
    }

    pub(crate) fn record_mut(&mut self, object: ObjectId) -> Result<&mut ObjectRecord, MarshalError> {
        self.objects.get_mut(object.index()).ok_or(MarshalError::InvalidObject(object))
    }

    /// Structure an object is an instance of.
    pub fn structure_of(&self, object: ObjectId) -> Result<StructureIndex, MarshalError> {
        Ok(self.record(object)?.structure)
    }

    /// Descriptor of the structure an object is an instance of.
    pub fn describe(&self, object: ObjectId) -> Result<&Structure, MarshalError> {
        self.structure(self.record(object)?.structure)
    }

    pub fn view_of(&self, object: ObjectId) -> Result<ViewId, MarshalError> {
        Ok(self.record(object)?.view)
    }

    pub fn bytes(&self, object: ObjectId) -> Result<&[u8], MarshalError> {
        let view = self.record(object)?.view;
        Ok(self.memory.view_bytes(view)?)
    }

    pub fn bytes_mut(&mut self, object: ObjectId) -> Result<&mut [u8], MarshalError> {
        let view = self.record(object)?.view;
        Ok(self.memory.view_bytes_mut(view)?)
    }

    /// Fixed address of an object's bytes.
    pub fn address_of(&self, object: ObjectId) -> Result<usize, MarshalError> {
        let view = self.record(object)?.view;
        Ok(self.memory.get_address(view)?)
    }

    pub(crate) fn read_scalar(&self, object: ObjectId, member: &MemberPlan, base: usize) -> Result<Scalar, MarshalError> {
        let getter = member.getter.as_ref().ok_or_else(|| self.not_scalar(object))?;
        let bytes = self.bytes(object)?;
        Ok(getter(bytes, base + member.byte_offset)?)
    }

    pub(crate) fn write_scalar(
        &mut self,
        object: ObjectId,
        member: &MemberPlan,
        base: usize,
        value: &Scalar,
    ) -> Result<(), MarshalError> {
        let setter = member.setter.clone().ok_or_else(|| self.not_scalar(object))?;
        let bytes = self.bytes_mut(object)?;
        Ok(setter(bytes, base + member.byte_offset, value)?)
    }

    fn not_scalar(&self, object: ObjectId) -> MarshalError {
        let found = self.describe(object).map(|s| s.name.clone()).unwrap_or_else(|_| object.to_string());
        MarshalError::InvalidType {
            expected: "scalar member".to_string(),
            found,
        }
    }

    /// Number of objects created so far.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EnvOptions::default())
    }
}
