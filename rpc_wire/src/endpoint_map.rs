// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A minimal client for the host-local endpoint-map database, grounded on
//! the teacher's `rpcbind::client::set`/`getaddr` RPCs. Narrowed to the two
//! operations `RpcServer`/`RpcClient` need (register/resolve); the full
//! `SET`/`UNSET`/`GETADDR`/`DUMP` service and its server binary belong to
//! the OS RPC runtime and are out of scope here (spec.md §1).
//!
//! Since this crate doesn't assume a real OS endpoint-map daemon is
//! present, `register_endpoint`/`resolve_endpoint` are backed by a
//! process-wide in-memory table — the same role the teacher's `rpcbind`
//! server plays over the wire, collapsed to an in-process directory so the
//! in-process [`crate::pipe`] transport can exercise dynamic endpoint
//! resolution end to end in tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

#[derive(Debug)]
pub enum EndpointMapError {
    /// The interface was already registered with a different address.
    AlreadyRegistered,
    /// No address is registered for the requested interface.
    NotRegistered,
}

impl fmt::Display for EndpointMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered => write!(f, "interface already registered in endpoint map"),
            Self::NotRegistered => write!(f, "interface not registered in endpoint map"),
        }
    }
}

impl std::error::Error for EndpointMapError {}

fn table() -> &'static Mutex<HashMap<String, String>> {
    static TABLE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `address` as the endpoint serving `interface_uuid`. Mirrors the
/// teacher's `rpcbind::client::set` RPC (a `SET` call to the endpoint-map
/// database), but resolved in-process.
pub fn register_endpoint(interface_uuid: &str, address: &str) -> Result<(), EndpointMapError> {
    let mut table = table().lock().unwrap();
    match table.get(interface_uuid) {
        Some(existing) if existing != address => Err(EndpointMapError::AlreadyRegistered),
        _ => {
            table.insert(interface_uuid.to_string(), address.to_string());
            Ok(())
        }
    }
}

/// Removes the registration for `interface_uuid`, if any. Idempotent.
pub fn unregister_endpoint(interface_uuid: &str) {
    table().lock().unwrap().remove(interface_uuid);
}

/// Mirrors the teacher's `rpcbind::client::getaddr` RPC: resolves the
/// address currently registered for `interface_uuid`, or `None` if no
/// compatible server is known.
pub fn resolve_endpoint(interface_uuid: &str) -> Option<String> {
    table().lock().unwrap().get(interface_uuid).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_resolves() {
        let iface = "test-iface-registers-and-resolves";
        unregister_endpoint(iface);
        assert!(resolve_endpoint(iface).is_none());

        register_endpoint(iface, "127.0.0.1:4000").unwrap();
        assert_eq!(resolve_endpoint(iface).as_deref(), Some("127.0.0.1:4000"));

        unregister_endpoint(iface);
        assert!(resolve_endpoint(iface).is_none());
    }

    #[test]
    fn rejects_conflicting_registration() {
        let iface = "test-iface-conflict";
        unregister_endpoint(iface);
        register_endpoint(iface, "127.0.0.1:4001").unwrap();
        assert!(matches!(
            register_endpoint(iface, "127.0.0.1:4002"),
            Err(EndpointMapError::AlreadyRegistered)
        ));
        unregister_endpoint(iface);
    }
}
