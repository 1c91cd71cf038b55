// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Scoped acquisition of the caller's identity during a server-side call
//! (spec section 4.9), grounded additionally on
//! `examples/other_examples/...win-api-wrappers-src-rpc.rs.rs`'s
//! `RpcBindingImpersonation`: impersonate on construction, revert and log
//! (never raise) on drop, no `Clone`/`Copy`.

use std::marker::PhantomData;
use std::sync::Arc;

use rpc_wire::{BindingHandle, RpcRuntime};

use crate::error::{LogPriority, Logger};

/// Holds a weak (borrowed) reference to the call's binding handle, which
/// the caller continues to own. Not `Send`: impersonation is strictly
/// thread-local (spec section 5) and must live entirely on the dispatched
/// call's thread.
pub struct ImpersonationScope<'a> {
    call_handle: &'a BindingHandle,
    runtime: Arc<dyn RpcRuntime>,
    logger: Arc<dyn Logger>,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ImpersonationScope<'a> {
    /// Invokes impersonate on `call_handle`; fails loudly if the runtime
    /// refuses.
    pub fn enter(
        call_handle: &'a BindingHandle,
        runtime: Arc<dyn RpcRuntime>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, crate::error::RpcError> {
        runtime.impersonate(call_handle).map_err(|status| {
            crate::error::RpcError::new(
                crate::error::ErrorKind::SecurityError,
                crate::error::describe(status, "Failed to impersonate RPC client", None),
            )
        })?;

        Ok(Self {
            call_handle,
            runtime,
            logger,
            _not_send: PhantomData,
        })
    }
}

impl Drop for ImpersonationScope<'_> {
    fn drop(&mut self) {
        if let Err(status) = self.runtime.revert_to_self(self.call_handle) {
            self.logger.write(
                &format!("failed to revert RPC impersonation: {status}"),
                LogPriority::Critical,
                None,
                false,
            );
        }
    }
}
