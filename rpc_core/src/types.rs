// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The data model from spec section 3, beyond what `rpc_wire` already
//! carries (`ProtocolSequence`, `AuthLevel`, `ImpersonationLevel` —
//! re-exported here since security negotiation treats it as part of this
//! crate's data model even though the wire layer owns the type).

use rpc_wire::ProtocolSequence;

pub use rpc_wire::ImpersonationLevel;

/// Which Windows-style security service (or TLS) a client negotiates.
/// Only `SecureChannel` is compatible with TCP-only transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationSecurity {
    Ntlm,
    /// Negotiate: falls back to NTLM if Kerberos is unavailable.
    TryKerberos,
    /// Must prove server identity.
    RequireMutualAuthn,
    /// TLS with X.509.
    SecureChannel,
}

/// Enumerated registry area a certificate store lives in, standing in for
/// the OS-specific store-location enum (`CERT_SYSTEM_STORE_*` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLocation {
    CurrentUser,
    LocalMachine,
}

/// Read-only after construction, per spec section 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub store_location: StoreLocation,
    pub store_name: String,
    /// Lookup key: the first certificate whose subject contains this
    /// string is used.
    pub subject: String,
    /// Enables revocation-chain checks and disables weaker cipher suites.
    pub stronger_security: bool,
}

/// One object a server exposes: an externally advertised UUID backed by an
/// interface handle and, optionally, an EPV overriding the interface's
/// default.
#[derive(Debug, Clone)]
pub struct RpcSrvObject {
    pub object_uuid: String,
    /// Opaque, generated from IDL; represented here as an opaque label
    /// since IDL-stub generation is out of scope.
    pub interface_handle: String,
    pub epv: Option<String>,
}

/// The server's finite state machine (spec section 3). `Listening` ↔
/// `IntfRegLocalEndptMap` is the only cyclic pair (stop/resume); every
/// other edge is one-way during startup, and the reverse during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotInitialized,
    BindingsAcquired,
    IntfRegRuntimeLib,
    IntfRegLocalEndptMap,
    Listening,
}

impl ServerState {
    /// The state one step earlier in the startup chain, or `None` for
    /// `NotInitialized`. Used to walk `Finalize`'s teardown in reverse.
    pub fn previous(self) -> Option<ServerState> {
        match self {
            ServerState::NotInitialized => None,
            ServerState::BindingsAcquired => Some(ServerState::NotInitialized),
            ServerState::IntfRegRuntimeLib => Some(ServerState::BindingsAcquired),
            ServerState::IntfRegLocalEndptMap => Some(ServerState::IntfRegRuntimeLib),
            ServerState::Listening => Some(ServerState::IntfRegLocalEndptMap),
        }
    }
}

/// Whether a `SecureChannel` client may bind over `Local` transport
/// (spec invariant: `SecureChannel` implies TCP).
pub fn schannel_compatible_with(protocol: ProtocolSequence) -> bool {
    matches!(protocol, ProtocolSequence::Tcp)
}
