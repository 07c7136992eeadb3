//! Call contexts.
//!
//! A context lives for the duration of one foreign call. It owns the
//! shadow copies made for relocatable pointer targets and remembers where
//! each shadow came from, so addresses handed out during the call map back
//! to the original bytes.

use crate::env::Environment;
use crate::error::MarshalError;
use std::fmt;
use strata_mem::{Address, BufferId, ViewId};

/// Handle of an active call context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// `len` bytes of fixed memory at `address` standing in for the bytes at
/// `offset` of `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShadowMapping {
    pub address: Address,
    pub len: usize,
    pub buffer: BufferId,
    pub offset: usize,
}

impl ShadowMapping {
    pub fn contains(&self, address: Address, len: usize) -> bool {
        match (address.checked_add(len), self.address.checked_add(self.len)) {
            (Some(end), Some(limit)) => address >= self.address && end <= limit,
            _ => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shadow {
    /// Relocatable bytes being shadowed.
    pub source: ViewId,
    /// Fixed copy of `source`.
    pub shadow: ViewId,
    /// What was allocated, which may start before `shadow` to satisfy
    /// alignment.
    pub allocation: ViewId,
    pub writable: bool,
    /// Set once `source` has been copied in. Unfilled shadows are never
    /// written back.
    pub filled: bool,
}

#[derive(Debug)]
pub(crate) struct CallContext {
    pub id: ContextId,
    pub mappings: Vec<ShadowMapping>,
    pub shadows: Vec<Shadow>,
    pub written_back: bool,
}

impl Environment {
    /// Opens a call context. Contexts nest and must be ended in reverse
    /// order.
    pub fn start_call(&mut self) -> ContextId {
        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.contexts.push(CallContext {
            id,
            mappings: Vec::new(),
            shadows: Vec::new(),
            written_back: false,
        });
        log::debug!("start {} (depth {})", id, self.contexts.len());
        id
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Result<&mut CallContext, MarshalError> {
        let innermost = self.contexts.last().map(|ctx| ctx.id);
        self.contexts
            .iter_mut()
            .rev()
            .find(|ctx| ctx.id == id)
            .ok_or_else(|| MarshalError::ContextMismatch {
                expected: innermost.map_or_else(|| "no context".to_string(), |id| id.to_string()),
                found: id.to_string(),
            })
    }

    /// Shadow mappings of every open context, innermost first.
    pub(crate) fn active_mappings(&self) -> Vec<ShadowMapping> {
        self.contexts.iter().rev().flat_map(|ctx| ctx.mappings.iter().rev().copied()).collect()
    }

    /// Number of open call contexts.
    pub fn call_depth(&self) -> usize {
        self.contexts.len()
    }

    /// Copies writable shadows back over the bytes they stand for. Runs at
    /// most once per context.
    pub fn write_back(&mut self, id: ContextId) -> Result<(), MarshalError> {
        let context = self.context_mut(id)?;
        if context.written_back {
            return Ok(());
        }
        context.written_back = true;
        let copies: Vec<(ViewId, ViewId)> = context
            .shadows
            .iter()
            .filter(|shadow| shadow.writable && shadow.filled)
            .map(|shadow| (shadow.shadow, shadow.source))
            .collect();
        for (shadow, source) in copies {
            log::trace!("write back {} -> {}", shadow, source);
            self.memory.copy_view(shadow, source)?;
        }
        Ok(())
    }

    /// Closes the innermost context: writes shadows back if that has not
    /// happened yet, then frees them. Shadows are freed even when the
    /// write-back fails.
    pub fn end_call(&mut self, id: ContextId) -> Result<(), MarshalError> {
        match self.contexts.last() {
            Some(context) if context.id == id => {}
            innermost => {
                return Err(MarshalError::ContextMismatch {
                    expected: innermost.map_or_else(|| "no context".to_string(), |ctx| ctx.id.to_string()),
                    found: id.to_string(),
                })
            }
        }
        let written = self.write_back(id);
        let Some(context) = self.contexts.pop() else {
            return written;
        };
        let mut released = Ok(());
        for shadow in &context.shadows {
            if let Err(err) = self.memory.release_fixed_view(shadow.allocation) {
                released = Err(err.into());
            }
        }
        log::debug!("end {} ({} shadows released)", id, context.shadows.len());
        written.and(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_mem::ViewRegistry;

    #[test]
    fn test_mapping_bounds_do_not_wrap() {
        let mut registry = ViewRegistry::default();
        let buffer = registry.create_buffer(vec![0; 16]);
        let mapping = ShadowMapping {
            address: 0x1000,
            len: 16,
            buffer,
            offset: 0,
        };
        assert!(mapping.contains(0x1004, 8));
        assert!(!mapping.contains(0x1004, 16));
        assert!(!mapping.contains(0x1004, usize::MAX));
        assert!(!mapping.contains(0xfff, 4));
    }
}
