//! Pointer synchronization.
//!
//! Before a call every pointer reachable from the arguments gets a fixed
//! address for its target. Targets that only exist in relocatable buffers
//! are copied into scratch shadows; overlapping targets in one buffer share
//! a single shadow so that their relative layout survives. After the call
//! the addresses are read back and mapped onto objects again.

use crate::context::{ContextId, Shadow, ShadowMapping};
use crate::env::Environment;
use crate::error::MarshalError;
use crate::value::ObjectId;
use rustc_hash::{FxHashMap, FxHashSet};
use strata_layout::StructureKind;
use strata_mem::{Address, AllocKind, BufferId, ViewId};

/// A relocatable target waiting for a shadow.
#[derive(Debug, Clone, Copy)]
struct PendingTarget {
    target: ObjectId,
    view: ViewId,
    offset: usize,
    len: usize,
    align: usize,
    writable: bool,
}

impl Environment {
    /// Visits every pointer reachable from `root`. `visit` returns the
    /// pointer's target, which is walked in turn when it can hold pointers.
    fn walk_pointers<F>(&mut self, root: ObjectId, mut visit: F) -> Result<(), MarshalError>
    where
        F: FnMut(&mut Environment, ObjectId) -> Result<Option<ObjectId>, MarshalError>,
    {
        let mut visited = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(object) = stack.pop() {
            if !visited.insert(object) {
                continue;
            }
            let structure = self.describe(object)?;
            let (kind, has_pointer) = (structure.kind, structure.has_pointer);
            if kind == StructureKind::Pointer {
                if let Some(target) = visit(self, object)? {
                    let target_structure = self.describe(target)?;
                    if target_structure.kind == StructureKind::Pointer || target_structure.has_pointer {
                        stack.push(target);
                    }
                }
            } else if has_pointer {
                stack.extend(self.live_pointer_children(object, kind)?);
            }
        }
        Ok(())
    }

    /// Pointer-bearing children that currently hold meaningful bytes:
    /// only the active variant of an exclusive union, only a present
    /// optional payload, only the payload of an error union without an
    /// error. Extern unions are never entered.
    fn live_pointer_children(&mut self, object: ObjectId, kind: StructureKind) -> Result<Vec<ObjectId>, MarshalError> {
        let plan = self.plan(self.structure_of(object)?)?;
        let member = |index: usize| plan.pointer_members.contains(&index).then_some(index);
        let selected = match kind {
            StructureKind::ExternUnion => None,
            StructureKind::BareUnion | StructureKind::TaggedUnion => self.active_variant(object)?.and_then(member),
            StructureKind::Optional => {
                if self.is_present(object)? {
                    member(0)
                } else {
                    None
                }
            }
            StructureKind::ErrorUnion => {
                if self.read_raw(object, &plan.members[1], 0)? == 0 {
                    member(0)
                } else {
                    None
                }
            }
            _ => return self.pointer_children(object),
        };
        match selected {
            Some(index) => Ok(vec![self.child(object, index)?]),
            None => Ok(Vec::new()),
        }
    }

    /// Gives every pointer reachable from `root` the fixed address of its
    /// target, shadowing relocatable targets in context `ctx`.
    ///
    /// All addresses are written before any target is copied into its
    /// shadow, so shadows of targets that themselves hold pointers carry the
    /// final addresses.
    pub fn update_pointer_addresses(&mut self, ctx: ContextId, root: ObjectId) -> Result<(), MarshalError> {
        self.context_mut(ctx)?;
        let mut pointers: Vec<(ObjectId, ObjectId)> = Vec::new();
        self.walk_pointers(root, |env, pointer| {
            let target = env.target(pointer)?;
            if let Some(target) = target {
                pointers.push((pointer, target));
            }
            Ok(target)
        })?;

        let mut addresses: FxHashMap<ObjectId, Address> = FxHashMap::default();
        let mut pending: FxHashMap<ObjectId, PendingTarget> = FxHashMap::default();
        for &(pointer, target) in &pointers {
            let view = self.view_of(target)?;
            if let Ok(address) = self.memory.get_address(view) {
                addresses.insert(target, address);
                continue;
            }
            let info = self.memory.info(view)?;
            let writable = !self.target_info(pointer)?.is_const;
            let align = self.describe(target)?.align;
            if info.len == 0 {
                // never dereferenced; any aligned non-null address will do
                addresses.insert(target, align);
                continue;
            }
            pending
                .entry(target)
                .and_modify(|entry| entry.writable |= writable)
                .or_insert(PendingTarget {
                    target,
                    view,
                    offset: info.offset,
                    len: info.len,
                    align,
                    writable,
                });
        }

        let mut by_buffer: FxHashMap<BufferId, Vec<PendingTarget>> = FxHashMap::default();
        for entry in pending.into_values() {
            let buffer = self.memory.info(entry.view)?.buffer;
            by_buffer.entry(buffer).or_default().push(entry);
        }
        let mut buffers: Vec<BufferId> = by_buffer.keys().copied().collect();
        buffers.sort();

        let mut copies: Vec<(ViewId, ViewId)> = Vec::new();
        for buffer in buffers {
            let mut targets = by_buffer.remove(&buffer).unwrap_or_default();
            targets.sort_by(|a, b| a.offset.cmp(&b.offset).then(b.len.cmp(&a.len)));
            for cluster in clusters(&targets) {
                self.shadow_cluster(ctx, buffer, cluster, &mut addresses, &mut copies)?;
            }
        }

        for &(pointer, target) in &pointers {
            let address = addresses.get(&target).copied().unwrap_or(0);
            let count = self.target_count(target)?;
            self.write_address(pointer, address, count)?;
        }
        self.fill_shadows(ctx, copies)
    }

    /// Copies sources into their shadows and marks the shadows filled.
    fn fill_shadows(&mut self, ctx: ContextId, copies: Vec<(ViewId, ViewId)>) -> Result<(), MarshalError> {
        for (source, shadow) in copies {
            self.memory.copy_view(source, shadow)?;
            let context = self.context_mut(ctx)?;
            if let Some(entry) = context.shadows.iter_mut().find(|entry| entry.shadow == shadow) {
                entry.filled = true;
            }
        }
        Ok(())
    }

    /// Allocates one scratch shadow for a group of overlapping targets.
    ///
    /// The shadow is aligned for the most demanding target `m`; it starts
    /// `r` bytes into the allocation, with `r` chosen so that `m` lands on
    /// its alignment. Every other target must then be aligned too.
    fn shadow_cluster(
        &mut self,
        ctx: ContextId,
        buffer: BufferId,
        cluster: &[PendingTarget],
        addresses: &mut FxHashMap<ObjectId, Address>,
        copies: &mut Vec<(ViewId, ViewId)>,
    ) -> Result<(), MarshalError> {
        let start = cluster.iter().map(|t| t.offset).min().unwrap_or(0);
        let end = cluster.iter().map(|t| t.offset + t.len).max().unwrap_or(start);
        let span = end - start;
        let writable = cluster.iter().any(|t| t.writable);

        let (leader, align) = cluster
            .iter()
            .fold((cluster[0], cluster[0].align), |(leader, align), t| {
                if t.align > align {
                    (*t, t.align)
                } else {
                    (leader, align)
                }
            });
        let residue = (align - (leader.offset - start) % align) % align;
        for target in cluster {
            if (residue + target.offset - start) % target.align != 0 {
                return Err(MarshalError::AlignmentConflict {
                    structure: self.describe(target.target)?.name.clone(),
                    first: leader.offset,
                    second: target.offset,
                });
            }
        }

        let allocation = self.memory.allocate_fixed_view(span + residue, align, AllocKind::Scratch)?;
        let shadow = self.memory.subview(allocation, residue, span)?;
        let source = self.memory.obtain_view(buffer, start, span)?;
        let base = self.memory.get_address(shadow)?;
        log::trace!(
            "shadow {} for {} targets of {} at {:#x} ({} bytes, align {})",
            shadow,
            cluster.len(),
            buffer,
            base,
            span,
            align
        );
        for target in cluster {
            addresses.insert(target.target, base + (target.offset - start));
        }
        copies.push((source, shadow));

        let context = self.context_mut(ctx)?;
        context.mappings.push(ShadowMapping {
            address: base,
            len: span,
            buffer,
            offset: start,
        });
        context.shadows.push(Shadow {
            source,
            shadow,
            allocation,
            writable,
            filled: false,
        });
        Ok(())
    }

    /// Gives `root` itself a fixed address for the duration of the call,
    /// shadowing it when it is relocatable.
    pub(crate) fn shadow_root(&mut self, ctx: ContextId, root: ObjectId) -> Result<Address, MarshalError> {
        let view = self.view_of(root)?;
        if let Ok(address) = self.memory.get_address(view) {
            return Ok(address);
        }
        let info = self.memory.info(view)?;
        let align = self.describe(root)?.align;
        let target = PendingTarget {
            target: root,
            view,
            offset: info.offset,
            len: info.len,
            align,
            writable: true,
        };
        if info.len == 0 {
            return Ok(align);
        }
        let mut addresses = FxHashMap::default();
        let mut copies = Vec::new();
        self.shadow_cluster(ctx, info.buffer, &[target], &mut addresses, &mut copies)?;
        self.fill_shadows(ctx, copies)?;
        Ok(addresses.get(&root).copied().unwrap_or(0))
    }

    /// Re-derives pointer targets from the addresses now stored in memory.
    ///
    /// A pointer is re-derived when nothing is cached for it, when it may
    /// have been changed by the foreign side (non-const), or always on
    /// inbound calls. Addresses inside a shadow map back to the shadowed
    /// bytes; others resolve to fixed memory. Only targets outside fixed
    /// memory are walked further.
    ///
    /// Constness is that of the pointer type itself (`*const T`), not of the
    /// object holding the pointer.
    pub fn update_pointer_targets(&mut self, ctx: ContextId, root: ObjectId, inbound: bool) -> Result<(), MarshalError> {
        self.context_mut(ctx)?;
        let mappings = self.active_mappings();
        self.walk_pointers(root, |env, pointer| {
            let info = env.target_info(pointer)?;
            let current = env.cached_target(pointer)?;
            if current.is_none() || !info.is_const || inbound {
                let resolved = env.resolve_address(pointer, &mappings)?;
                let next = match (current, resolved) {
                    (Some(current), Some(resolved)) if env.view_of(current)? == env.view_of(resolved)? => Some(current),
                    (Some(current), Some(resolved))
                        if env.memory.info(env.view_of(resolved)?)?.len == 0
                            && env.memory.info(env.view_of(current)?)?.len == 0 =>
                    {
                        Some(current)
                    }
                    (_, resolved) => resolved,
                };
                if next != current {
                    log::trace!("pointer {} now targets {:?}", pointer, next);
                }
                env.store_target(pointer, next)?;
            }
            match env.cached_target(pointer)? {
                Some(target) if !env.memory.is_fixed(env.view_of(target)?)? => Ok(Some(target)),
                _ => Ok(None),
            }
        })
    }
}

/// Splits targets sorted by offset into groups whose byte ranges overlap.
/// Targets that merely touch stay apart.
fn clusters(targets: &[PendingTarget]) -> Vec<&[PendingTarget]> {
    let mut groups = Vec::new();
    let mut first = 0;
    let mut end = 0;
    for (index, target) in targets.iter().enumerate() {
        if index > first && target.offset >= end {
            groups.push(&targets[first..index]);
            first = index;
        }
        if index == first {
            end = target.offset + target.len;
        } else {
            end = end.max(target.offset + target.len);
        }
    }
    if first < targets.len() {
        groups.push(&targets[first..]);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_mem::ViewRegistry;

    fn pending(id: u32, offset: usize, len: usize) -> PendingTarget {
        let mut registry = ViewRegistry::default();
        let buffer = registry.create_buffer(vec![0; 32]);
        PendingTarget {
            target: ObjectId(id),
            view: registry.obtain_view(buffer, offset, len).unwrap(),
            offset,
            len,
            align: 1,
            writable: false,
        }
    }

    #[test]
    fn test_clusters_split_on_gaps() {
        let targets = [pending(0, 0, 8), pending(1, 4, 8), pending(2, 12, 4), pending(3, 20, 4)];
        let groups = clusters(&targets);
        let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_contained_target_joins_cluster() {
        let targets = [pending(0, 0, 16), pending(1, 4, 4), pending(2, 10, 2)];
        assert_eq!(clusters(&targets).len(), 1);
    }
}
