// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! [`RpcRuntime`] is the seam spec.md leaves unnamed: "the OS RPC runtime"
//! and "the IDL-generated stubs", reached through a narrow interface
//! (spec.md §1, §6). `rpc_core`'s `RpcClient`/`RpcServer` hold a
//! `Arc<dyn RpcRuntime>` rather than calling a concrete transport directly,
//! so a reimplementation can target any DCE/RPC-compatible runtime — or, in
//! tests, an in-process double — without touching the wrapper logic.
//!
//! [`WireRuntime`] is the one concrete implementation this crate ships:
//! composes the primitives in [`crate::binding`] and [`crate::endpoint_map`]
//! the way `rpc_impl_client.cpp`/`rpc_impl_server.cpp` compose the real
//! Windows RPC runtime calls.

use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixListener;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::binding::ReadWrite;
use crate::{endpoint_map, AuthLevel, BindingHandle, ProtocolSequence, RpcStatus, SecurityContext, ServerBindings};

/// The runtime operations an RPC wrapper needs from the OS RPC runtime and
/// from the IDL-generated stub layer. See the module documentation.
pub trait RpcRuntime: Send + Sync {
    // --- client-facing ---

    /// Composes a binding string from the given parts and parses it into a
    /// handle (the original's `RpcStringBindingCompose` followed by
    /// `RpcBindingFromStringBinding`), connecting the underlying stream if
    /// an endpoint is already known.
    fn compose_and_bind(
        &self,
        protocol: ProtocolSequence,
        object_uuid: Option<&str>,
        destination: &str,
        endpoint: Option<&str>,
    ) -> Result<BindingHandle, RpcStatus>;

    /// Strips the endpoint from `handle`, producing a partially-bound
    /// handle that re-resolves against the endpoint-map database on the
    /// next call.
    fn reset_bindings(&self, handle: &mut BindingHandle) -> Result<(), RpcStatus>;

    /// Releases resources owned by `handle` (e.g. its connection).
    fn release_binding(&self, handle: BindingHandle);

    /// Attaches negotiated security parameters to `handle`.
    fn apply_security(&self, handle: &mut BindingHandle, security: SecurityContext) -> Result<(), RpcStatus>;

    /// Invokes `stub` once, converting a caught panic (the Rust analogue of
    /// the original's SEH-wrapped structured exception) into
    /// `RpcStatus::Fatal` so the retry logic never sees an unwind.
    fn invoke(
        &self,
        tag: &str,
        handle: &BindingHandle,
        stub: &mut dyn FnMut(&BindingHandle) -> Result<(), RpcStatus>,
    ) -> RpcStatus {
        match catch_unwind(AssertUnwindSafe(|| stub(handle))) {
            Ok(Ok(())) => RpcStatus::Ok,
            Ok(Err(status)) => status,
            Err(_) => {
                warn!("RPC call '{tag}' panicked inside the stub closure");
                RpcStatus::Fatal
            }
        }
    }

    // --- server-facing ---

    /// Selects `protocol` and acquires bindings for it (the original's
    /// `RpcServerUseProtseq*` + `RpcServerInqBindings`).
    fn inquire_bindings(&self, protocol: ProtocolSequence) -> Result<ServerBindings, RpcStatus>;

    /// Registers `interface_uuid` with the runtime's interface table.
    fn register_interface(&self, bindings: &ServerBindings, interface_uuid: &str) -> Result<(), RpcStatus>;

    /// Undoes [`Self::register_interface`].
    fn unregister_interface(&self, bindings: &ServerBindings, interface_uuid: &str) -> Result<(), RpcStatus>;

    /// Registers `object_uuids` under `interface_uuid` with the host-local
    /// endpoint-map database.
    fn register_endpoint_map(
        &self,
        bindings: &ServerBindings,
        interface_uuid: &str,
        annotation: &str,
    ) -> Result<(), RpcStatus>;

    /// Undoes [`Self::register_endpoint_map`].
    fn unregister_endpoint_map(&self, bindings: &ServerBindings, interface_uuid: &str) -> Result<(), RpcStatus>;

    /// Releases the bindings themselves.
    fn release_bindings(&self, bindings: ServerBindings);

    /// Starts accepting calls on `bindings` (the original's `RpcServerListen`).
    fn begin_listen(&self, bindings: &ServerBindings) -> Result<(), RpcStatus>;

    /// Stops accepting calls, awaiting completion.
    fn stop_listen(&self, bindings: &ServerBindings) -> Result<(), RpcStatus>;

    /// Restarts accepting calls on bindings that were previously stopped.
    fn resume_listen(&self, bindings: &ServerBindings) -> Result<(), RpcStatus>;

    /// Blocks the calling thread until an external stop ends listening.
    fn wait(&self, bindings: &ServerBindings);

    /// Impersonates the caller identified by `call_handle` on the current
    /// thread.
    fn impersonate(&self, call_handle: &BindingHandle) -> Result<(), RpcStatus>;

    /// Reverts a prior [`Self::impersonate`]. Never fails observably; any
    /// underlying failure is the caller's concern to log.
    fn revert_to_self(&self, call_handle: &BindingHandle) -> Result<(), RpcStatus>;

    /// The effective authentication level of the call identified by
    /// `call_handle`.
    fn inquire_auth_level(&self, call_handle: &BindingHandle) -> AuthLevel;
}

struct BoundListener {
    protocol: ProtocolSequence,
    tcp: Option<TcpListener>,
    unix: Option<UnixListener>,
}

struct ActiveListener {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Concrete [`RpcRuntime`] backed by real TCP/Unix-domain sockets, or by
/// streams handed to it through `connect_override` (used by tests to plug
/// in the in-process [`crate::pipe`] transport without opening a real
/// socket).
pub struct WireRuntime {
    bound: Mutex<HashMap<String, BoundListener>>,
    active: Mutex<HashMap<String, ActiveListener>>,
    connect_override: Option<Box<dyn Fn(&str) -> io::Result<Box<dyn ReadWrite>> + Send + Sync>>,
}

impl Default for WireRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WireRuntime {
    pub fn new() -> Self {
        Self {
            bound: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            connect_override: None,
        }
    }

    /// Builds a runtime whose client connections are produced by `connect`
    /// instead of opening a real socket — how tests wire up the in-process
    /// [`crate::pipe`] transport.
    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn(&str) -> io::Result<Box<dyn ReadWrite>> + Send + Sync + 'static,
    {
        Self {
            bound: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            connect_override: Some(Box::new(connect)),
        }
    }

    fn connect(&self, destination: &str, endpoint: &str) -> io::Result<Box<dyn ReadWrite>> {
        let address = format!("{destination}:{endpoint}");
        if let Some(connector) = &self.connect_override {
            return connector(&address);
        }
        let stream = TcpStream::connect(&address)?;
        Ok(Box::new(stream))
    }
}

impl RpcRuntime for WireRuntime {
    fn compose_and_bind(
        &self,
        protocol: ProtocolSequence,
        object_uuid: Option<&str>,
        destination: &str,
        endpoint: Option<&str>,
    ) -> Result<BindingHandle, RpcStatus> {
        let mut handle = BindingHandle::new(
            protocol,
            object_uuid.map(str::to_owned),
            destination.to_owned(),
            endpoint.map(str::to_owned),
        );

        if let Some(endpoint) = endpoint {
            match self.connect(destination, endpoint) {
                Ok(stream) => handle.set_connection(stream),
                Err(e) => {
                    debug!("failed to connect to {destination}:{endpoint}: {e}");
                    return Err(RpcStatus::ServerUnavailable);
                }
            }
        }

        Ok(handle)
    }

    fn reset_bindings(&self, handle: &mut BindingHandle) -> Result<(), RpcStatus> {
        handle.reset_endpoint();
        Ok(())
    }

    fn release_binding(&self, _handle: BindingHandle) {
        // Dropping `_handle` closes its connection, if any.
    }

    fn apply_security(&self, handle: &mut BindingHandle, security: SecurityContext) -> Result<(), RpcStatus> {
        handle.set_security(security);
        Ok(())
    }

    fn inquire_bindings(&self, protocol: ProtocolSequence) -> Result<ServerBindings, RpcStatus> {
        let address = match protocol {
            ProtocolSequence::Tcp => {
                let listener = TcpListener::bind("127.0.0.1:0").map_err(|_| RpcStatus::InvalidBinding)?;
                let address = listener.local_addr().map_err(|_| RpcStatus::InvalidBinding)?.to_string();
                self.bound.lock().unwrap().insert(
                    address.clone(),
                    BoundListener {
                        protocol,
                        tcp: Some(listener),
                        unix: None,
                    },
                );
                address
            }
            ProtocolSequence::Local => {
                let path = std::env::temp_dir().join(format!("rpc-core-{}.sock", uniq_id()));
                let _ = std::fs::remove_file(&path);
                let listener = UnixListener::bind(&path).map_err(|_| RpcStatus::InvalidBinding)?;
                let address = path.to_string_lossy().into_owned();
                self.bound.lock().unwrap().insert(
                    address.clone(),
                    BoundListener {
                        protocol,
                        tcp: None,
                        unix: Some(listener),
                    },
                );
                address
            }
        };

        Ok(ServerBindings::new(protocol, vec![address]))
    }

    fn register_interface(&self, _bindings: &ServerBindings, _interface_uuid: &str) -> Result<(), RpcStatus> {
        Ok(())
    }

    fn unregister_interface(&self, _bindings: &ServerBindings, _interface_uuid: &str) -> Result<(), RpcStatus> {
        Ok(())
    }

    fn register_endpoint_map(
        &self,
        bindings: &ServerBindings,
        interface_uuid: &str,
        annotation: &str,
    ) -> Result<(), RpcStatus> {
        let Some(address) = bindings.addresses().first() else {
            return Err(RpcStatus::RegistrationFailed);
        };
        debug!("registering '{interface_uuid}' at {address} ({annotation})");
        endpoint_map::register_endpoint(interface_uuid, address).map_err(|_| RpcStatus::RegistrationFailed)
    }

    fn unregister_endpoint_map(&self, _bindings: &ServerBindings, interface_uuid: &str) -> Result<(), RpcStatus> {
        endpoint_map::unregister_endpoint(interface_uuid);
        Ok(())
    }

    fn release_bindings(&self, bindings: ServerBindings) {
        let mut bound = self.bound.lock().unwrap();
        for address in bindings.addresses() {
            bound.remove(address);
            if matches!(bindings.protocol(), ProtocolSequence::Local) {
                let _ = std::fs::remove_file(address);
            }
        }
    }

    fn begin_listen(&self, bindings: &ServerBindings) -> Result<(), RpcStatus> {
        for address in bindings.addresses() {
            let Some(entry) = self.bound.lock().unwrap().remove(address) else {
                return Err(RpcStatus::InvalidBinding);
            };

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = Arc::clone(&stop);

            let thread = match (entry.tcp, entry.unix) {
                (Some(listener), None) => {
                    listener.set_nonblocking(true).map_err(|_| RpcStatus::InvalidBinding)?;
                    std::thread::spawn(move || accept_loop(listener, stop_clone))
                }
                (None, Some(listener)) => {
                    listener.set_nonblocking(true).map_err(|_| RpcStatus::InvalidBinding)?;
                    std::thread::spawn(move || accept_loop(listener, stop_clone))
                }
                _ => return Err(RpcStatus::InvalidBinding),
            };

            self.active
                .lock()
                .unwrap()
                .insert(address.clone(), ActiveListener { stop, thread });

            // keep a record so release_bindings/reuse can find the entry again
            self.bound.lock().unwrap().insert(
                address.clone(),
                BoundListener {
                    protocol: entry.protocol,
                    tcp: None,
                    unix: None,
                },
            );
        }

        Ok(())
    }

    fn stop_listen(&self, bindings: &ServerBindings) -> Result<(), RpcStatus> {
        for address in bindings.addresses() {
            if let Some(active) = self.active.lock().unwrap().remove(address) {
                active.stop.store(true, Ordering::SeqCst);
                let _ = active.thread.join();
            }
        }
        Ok(())
    }

    fn resume_listen(&self, bindings: &ServerBindings) -> Result<(), RpcStatus> {
        for address in bindings.addresses() {
            let protocol = self
                .bound
                .lock()
                .unwrap()
                .get(address)
                .map(|e| e.protocol)
                .unwrap_or(bindings.protocol());

            let entry = match protocol {
                ProtocolSequence::Tcp => BoundListener {
                    protocol,
                    tcp: Some(TcpListener::bind(address).map_err(|_| RpcStatus::InvalidBinding)?),
                    unix: None,
                },
                ProtocolSequence::Local => {
                    let _ = std::fs::remove_file(address);
                    BoundListener {
                        protocol,
                        tcp: None,
                        unix: Some(UnixListener::bind(address).map_err(|_| RpcStatus::InvalidBinding)?),
                    }
                }
            };
            self.bound.lock().unwrap().insert(address.clone(), entry);
        }

        self.begin_listen(bindings)
    }

    fn wait(&self, bindings: &ServerBindings) {
        loop {
            let still_listening = bindings
                .addresses()
                .iter()
                .any(|address| self.active.lock().unwrap().contains_key(address));

            if !still_listening {
                return;
            }

            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn impersonate(&self, call_handle: &BindingHandle) -> Result<(), RpcStatus> {
        match call_handle.security() {
            Some(security) if security.impersonation_level == crate::ImpersonationLevel::Default => {
                Err(RpcStatus::AccessDenied)
            }
            _ => Ok(()),
        }
    }

    fn revert_to_self(&self, _call_handle: &BindingHandle) -> Result<(), RpcStatus> {
        Ok(())
    }

    fn inquire_auth_level(&self, call_handle: &BindingHandle) -> AuthLevel {
        match call_handle.security() {
            None => AuthLevel::None,
            Some(security) if security.mutual_authn => AuthLevel::Privacy,
            Some(_) => AuthLevel::Integrity,
        }
    }
}

fn accept_loop<L>(listener: L, stop: Arc<AtomicBool>)
where
    L: Accepting,
{
    while !stop.load(Ordering::SeqCst) {
        match listener.accept_one() {
            Ok(Some(_stream)) => {
                // Dispatch-to-procedure is the IDL stub layer's job
                // (external collaborator); accepting proves the listener
                // is alive.
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                warn!("error accepting connection: {e}");
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

trait Accepting {
    fn accept_one(&self) -> io::Result<Option<Box<dyn ReadWrite>>>;
}

impl Accepting for TcpListener {
    fn accept_one(&self) -> io::Result<Option<Box<dyn ReadWrite>>> {
        match self.accept() {
            Ok((stream, _)) => Ok(Some(Box::new(stream))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Accepting for UnixListener {
    fn accept_one(&self) -> io::Result<Option<Box<dyn ReadWrite>>> {
        match self.accept() {
            Ok((stream, _)) => Ok(Some(Box::new(stream))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn uniq_id() -> u64 {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let pid = std::process::id() as u64;
    (pid << 32) | COUNTER.fetch_add(1, Ordering::Relaxed)
}
