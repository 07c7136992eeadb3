//! Calls across the boundary.

use crate::context::ContextId;
use crate::env::{Constructor, Environment};
use crate::error::MarshalError;
use crate::value::ObjectId;
use strata_mem::Address;

/// The foreign side of a call.
///
/// `call` runs `function` through `thunk` with the arguments at `args`. It
/// gets the environment back so it can read and write fixed memory and call
/// into the host again.
pub trait ForeignModule {
    fn call(&mut self, env: &mut Environment, thunk: Address, function: Address, args: Address) -> Result<(), String>;
}

impl<F> ForeignModule for F
where
    F: FnMut(&mut Environment, Address, Address, Address) -> Result<(), String>,
{
    fn call(&mut self, env: &mut Environment, thunk: Address, function: Address, args: Address) -> Result<(), String> {
        self(env, thunk, function, args)
    }
}

impl Environment {
    /// Calls `function` with the argument struct `args`.
    ///
    /// Pointers reachable from the arguments are synchronized before the
    /// call and re-derived after it. The call context is ended whatever
    /// happens; an error from the call itself wins over one from teardown.
    pub fn invoke(
        &mut self,
        foreign: &mut dyn ForeignModule,
        thunk: Address,
        function: Address,
        args: ObjectId,
    ) -> Result<(), MarshalError> {
        let ctx = self.start_call();
        let result = self.run_call(ctx, foreign, thunk, function, args);
        let ended = self.end_call(ctx);
        result.and(ended)
    }

    fn run_call(
        &mut self,
        ctx: ContextId,
        foreign: &mut dyn ForeignModule,
        thunk: Address,
        function: Address,
        args: ObjectId,
    ) -> Result<(), MarshalError> {
        self.update_pointer_addresses(ctx, args)?;
        let address = self.shadow_root(ctx, args)?;
        log::debug!("calling {:#x} via {:#x} with arguments at {:#x}", function, thunk, address);
        foreign
            .call(self, thunk, function, address)
            .map_err(MarshalError::CallFailed)?;
        self.write_back(ctx)?;
        self.update_pointer_targets(ctx, args, false)
    }

    /// Handles a call coming from the foreign side with arguments at
    /// `address`. The handler sees the arguments as an object whose
    /// pointers have been resolved.
    pub fn with_inbound_call<T, F>(&mut self, ctor: Constructor, address: Address, handler: F) -> Result<T, MarshalError>
    where
        F: FnOnce(&mut Environment, ObjectId) -> Result<T, MarshalError>,
    {
        let ctx = self.start_call();
        let result = self.run_inbound(ctx, ctor, address, handler);
        let ended = self.end_call(ctx);
        match result {
            Ok(value) => ended.map(|()| value),
            Err(err) => Err(err),
        }
    }

    fn run_inbound<T, F>(&mut self, ctx: ContextId, ctor: Constructor, address: Address, handler: F) -> Result<T, MarshalError>
    where
        F: FnOnce(&mut Environment, ObjectId) -> Result<T, MarshalError>,
    {
        let size = self.structure(ctor.structure())?.byte_size;
        let args = self.cast_address(ctor, address, size)?;
        self.update_pointer_targets(ctx, args, true)?;
        log::debug!("inbound call with arguments at {:#x}", address);
        handler(self, args)
    }
}
