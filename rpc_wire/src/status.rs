// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The numeric status codes the runtime returns from a completed RPC
//! attempt, grounded on the classification table in spec section 4.10 and
//! on `rpc_impl_client.cpp`'s `RpcErrRecommendedAction`/`GetRecommendation`.

use std::fmt;

/// Outcome of one attempt to invoke a stub routine through a binding handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcStatus {
    Ok,

    /// The call was cancelled by the runtime.
    CallCancelled,
    /// The call failed because the callee does not exist (yet).
    CallFailedDne,

    /// The server reported it is out of memory.
    ServerOutOfMemory,
    /// The server reported it is too busy to service the call right now.
    ServerTooBusy,

    /// A communication failure occurred talking to the server.
    CommFailure,
    /// The server process exists but is not currently listening.
    NotListening,
    /// The endpoint-map database has no entry for this interface.
    EndpointNotRegistered,
    /// The server is unreachable.
    ServerUnavailable,

    /// Access was denied by the server's authorization callback.
    AccessDenied,
    /// Composing or parsing a binding string failed.
    InvalidBinding,
    /// Registering an interface or endpoint failed (e.g. duplicate entry).
    RegistrationFailed,

    /// An unrecoverable failure: a caught panic/structured exception from
    /// the stub closure, or a memory violation reported by the runtime.
    Fatal,

    /// Any other runtime-specific status, not covered by a named variant
    /// above. Always classified as `Quit` by `RetryPolicy`.
    Other(u32),
}

impl RpcStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, RpcStatus::Ok)
    }

    /// A short machine-stable label, analogous to the original's
    /// `RPC_STATUS` code-to-string mapping, used by the error taxonomy to
    /// format `"<caller-tag> returned <code-label>: ..."`.
    pub fn label(self) -> &'static str {
        match self {
            RpcStatus::Ok => "RPC_S_OK",
            RpcStatus::CallCancelled => "RPC_S_CALL_CANCELLED",
            RpcStatus::CallFailedDne => "RPC_S_CALL_FAILED_DNE",
            RpcStatus::ServerOutOfMemory => "RPC_S_SERVER_OUT_OF_MEMORY",
            RpcStatus::ServerTooBusy => "RPC_S_SERVER_TOO_BUSY",
            RpcStatus::CommFailure => "RPC_S_COMM_FAILURE",
            RpcStatus::NotListening => "RPC_S_NOT_LISTENING",
            RpcStatus::EndpointNotRegistered => "EPT_S_NOT_REGISTERED",
            RpcStatus::ServerUnavailable => "RPC_S_SERVER_UNAVAILABLE",
            RpcStatus::AccessDenied => "RPC_S_ACCESS_DENIED",
            RpcStatus::InvalidBinding => "RPC_S_INVALID_BINDING",
            RpcStatus::RegistrationFailed => "RPC_S_ALREADY_REGISTERED",
            RpcStatus::Fatal => "RPC_S_FATAL",
            RpcStatus::Other(_) => "RPC_S_UNKNOWN",
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcStatus::Other(code) => write!(f, "{} ({code})", self.label()),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Ordered authentication level, shared between the wire layer (which
/// checks it in the authorization callback) and `rpc_core` (which negotiates
/// it). `None` < `Integrity` < `Privacy`, matching spec section 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthLevel {
    None,
    Integrity,
    Privacy,
}

/// What the server may do with the client's token once impersonated (spec
/// section 3), shared between the wire layer (`WireRuntime::impersonate`
/// acts on it) and `rpc_core` (which negotiates it alongside `AuthLevel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImpersonationLevel {
    Default,
    Identify,
    Impersonate,
    Delegate,
}

impl Default for ImpersonationLevel {
    fn default() -> Self {
        ImpersonationLevel::Default
    }
}
