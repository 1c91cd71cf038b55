// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Singleton RPC server: acquires bindings, registers interfaces and the
//! endpoint map, and drives the listening state machine (spec section 4.8),
//! grounded on `rpc_impl_server.cpp`'s `RpcServer::Initialize`/`Start`/
//! `Stop`/`Resume`/`Finalize`.

pub mod impersonation;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rpc_wire::{AuthLevel, BindingHandle, ProtocolSequence, RpcRuntime, ServerBindings};

use crate::error::{describe, ErrorKind, ErrorRecord, LogPriority, Logger, RpcError};
use crate::security::{
    CertStoreBackend, CertificateStore, ChannelCredentials, DirectoryProbe, SecurityNegotiator, UuidVector,
};
use crate::types::{CertInfo, RpcSrvObject, ServerState};

pub use impersonation::ImpersonationScope;

/// Security configuration consulted only when `Initialize`'s `auth_level` is
/// not `None`. Borrowed for the duration of one `initialize` call; nothing
/// here is retained beyond it except the derived [`ChannelCredentials`].
pub enum ServerSecurity<'a> {
    None,
    WindowsSec {
        host_fqdn: &'a str,
        directory_probe: &'a dyn DirectoryProbe,
    },
    Tls {
        cert_info: &'a CertInfo,
        cert_backend: Arc<dyn CertStoreBackend>,
    },
}

struct RegisteredObject {
    object_uuid: String,
    type_uuid: String,
    interface_handle: String,
}

struct ServerInner {
    state: ServerState,
    required_auth_level: AuthLevel,
    bindings: Option<ServerBindings>,
    service_name: String,
    registered: Vec<RegisteredObject>,
    registered_interfaces: Vec<String>,
    // Field order matters: credentials (and the certificate context inside)
    // must drop before the root store they came from.
    credentials: Option<ChannelCredentials>,
    cert_store: Option<CertificateStore>,
}

impl Default for ServerInner {
    fn default() -> Self {
        Self {
            state: ServerState::NotInitialized,
            required_auth_level: AuthLevel::None,
            bindings: None,
            service_name: String::new(),
            registered: Vec::new(),
            registered_interfaces: Vec::new(),
            credentials: None,
            cert_store: None,
        }
    }
}

static SERVER_EXISTS: AtomicBool = AtomicBool::new(false);

/// At most one `RpcServer` may exist per process (spec section 4.8: "maps
/// naturally to a process-wide container"). Initialization is always
/// explicit; there is no lazy-on-first-use path, so failures surface at a
/// deterministic call.
pub struct RpcServer {
    runtime: Arc<dyn RpcRuntime>,
    logger: Arc<dyn Logger>,
    inner: Mutex<ServerInner>,
}

impl RpcServer {
    pub fn new(runtime: Arc<dyn RpcRuntime>, logger: Arc<dyn Logger>) -> Result<Self, RpcError> {
        if SERVER_EXISTS.swap(true, Ordering::SeqCst) {
            return Err(RpcError::configuration(
                "an RpcServer instance already exists in this process",
            ));
        }

        Ok(Self {
            runtime,
            logger,
            inner: Mutex::new(ServerInner::default()),
        })
    }

    pub fn state(&self) -> ServerState {
        self.inner.lock().unwrap().state
    }

    pub fn required_auth_level(&self) -> AuthLevel {
        self.inner.lock().unwrap().required_auth_level
    }

    /// `NotInitialized -> BindingsAcquired`. Atomic: any failure after the
    /// bindings were acquired releases them again before returning.
    pub fn initialize(
        &self,
        protocol: ProtocolSequence,
        service_name: &str,
        auth_level: AuthLevel,
        security: ServerSecurity<'_>,
    ) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ServerState::NotInitialized {
            return Err(RpcError::configuration("RpcServer is already initialized"));
        }

        let bindings = self.runtime.inquire_bindings(protocol).map_err(|status| {
            RpcError::new(
                ErrorKind::BindingError,
                describe(status, "Failed to acquire RPC server bindings", None),
            )
        })?;

        match Self::configure_security(protocol, service_name, auth_level, security, self.logger.as_ref()) {
            Ok((credentials, cert_store)) => {
                inner.state = ServerState::BindingsAcquired;
                inner.required_auth_level = auth_level;
                inner.bindings = Some(bindings);
                inner.service_name = service_name.to_owned();
                inner.credentials = credentials;
                inner.cert_store = cert_store;

                self.logger.write(
                    &format!("RPC server '{service_name}' acquired bindings for protocol sequence '{protocol}'"),
                    LogPriority::Notice,
                    None,
                    false,
                );
                Ok(())
            }
            Err(err) => {
                self.runtime.release_bindings(bindings);
                Err(err)
            }
        }
    }

    fn configure_security(
        protocol: ProtocolSequence,
        service_name: &str,
        auth_level: AuthLevel,
        security: ServerSecurity<'_>,
        logger: &dyn Logger,
    ) -> Result<(Option<ChannelCredentials>, Option<CertificateStore>), RpcError> {
        if auth_level == AuthLevel::None {
            return Ok((None, None));
        }

        match security {
            ServerSecurity::None => Err(RpcError::configuration(
                "a non-None auth_level requires a security configuration",
            )),
            ServerSecurity::WindowsSec { host_fqdn, directory_probe } => {
                let directory_available = directory_probe.detect(false)?;
                let negotiation = SecurityNegotiator::negotiate_server(protocol, directory_available, service_name, host_fqdn);

                match &negotiation.spn {
                    Some(spn) => logger.write(
                        &format!("RPC server registered service principal name '{spn}'"),
                        LogPriority::Notice,
                        None,
                        false,
                    ),
                    None => logger.write(
                        "Active Directory is unavailable; RPC server will authenticate with NTLM only",
                        LogPriority::Notice,
                        None,
                        false,
                    ),
                }

                Ok((None, None))
            }
            ServerSecurity::Tls { cert_info, cert_backend } => {
                let store = CertificateStore::open(Arc::clone(&cert_backend), cert_info.store_location, &cert_info.store_name)?;
                let certificate = store.find_by_subject(&cert_info.subject)?.ok_or_else(|| {
                    RpcError::new(
                        ErrorKind::SecurityError,
                        ErrorRecord {
                            primary_message: format!("no certificate found matching subject '{}'", cert_info.subject),
                            detail: None,
                            extended: Vec::new(),
                            extended_chain_note: None,
                        },
                    )
                })?;
                let root_store = CertificateStore::open(Arc::clone(&cert_backend), cert_info.store_location, "Root")?;

                let credentials = ChannelCredentials::for_server(root_store, certificate, cert_info.stronger_security);
                // `store` (the one the certificate came from) is kept
                // alongside `credentials` so it outlives the certificate
                // context, matching the release-before-close invariant.
                Ok((Some(credentials), Some(store)))
            }
        }
    }

    /// `BindingsAcquired -> IntfRegRuntimeLib -> IntfRegLocalEndptMap ->
    /// Listening`, all within one call. Any partial failure rolls back to
    /// `BindingsAcquired`, undoing exactly the stages that had succeeded.
    pub fn start(&self, objects: Vec<RpcSrvObject>) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ServerState::BindingsAcquired {
            return Err(RpcError::configuration(
                "RpcServer::start requires the BindingsAcquired state",
            ));
        }
        if objects.is_empty() {
            return Err(RpcError::configuration("RpcServer::start requires at least one object"));
        }

        let mut seen = HashSet::new();
        for object in &objects {
            if !seen.insert(object.object_uuid.clone()) {
                return Err(RpcError::new(
                    ErrorKind::RegistrationError,
                    ErrorRecord {
                        primary_message: format!("duplicate object UUID '{}' in a single Start call", object.object_uuid),
                        detail: None,
                        extended: Vec::new(),
                        extended_chain_note: None,
                    },
                ));
            }
        }

        let bindings = inner.bindings.clone().expect("bindings present in BindingsAcquired state");

        // Stage A: register a fresh type UUID per object.
        let mut registered = Vec::new();
        for object in &objects {
            let type_uuid = format!("type-{}-{}", object.interface_handle, object.object_uuid);
            if let Err(status) = self.runtime.register_interface(&bindings, &type_uuid) {
                for done in registered.iter().rev() {
                    let done: &RegisteredObject = done;
                    let _ = self.runtime.unregister_interface(&bindings, &done.type_uuid);
                }
                return Err(RpcError::new(
                    ErrorKind::RegistrationError,
                    describe(status, "Failed to register RPC interface", Some(&object.object_uuid)),
                ));
            }
            registered.push(RegisteredObject {
                object_uuid: object.object_uuid.clone(),
                type_uuid,
                interface_handle: object.interface_handle.clone(),
            });
        }
        inner.state = ServerState::IntfRegRuntimeLib;

        // Stage B: group by interface handle, accumulate object UUIDs,
        // register each group with the local endpoint map.
        let mut groups: Vec<(String, UuidVector)> = Vec::new();
        for object in &registered {
            let add_result = match groups.iter_mut().find(|(handle, _)| handle == &object.interface_handle) {
                Some(group) => group.1.add(object.object_uuid.clone()),
                None => {
                    let mut vector = UuidVector::new();
                    let result = vector.add(object.object_uuid.clone());
                    groups.push((object.interface_handle.clone(), vector));
                    result
                }
            };

            if let Err(err) = add_result {
                for done in registered.iter().rev() {
                    let _ = self.runtime.unregister_interface(&bindings, &done.type_uuid);
                }
                inner.state = ServerState::BindingsAcquired;
                return Err(err);
            }
        }

        let annotation = annotation_from(&inner.service_name);
        let mut registered_interfaces = Vec::new();
        for (interface_handle, _) in &groups {
            if let Err(status) = self.runtime.register_endpoint_map(&bindings, interface_handle, &annotation) {
                for done in registered_interfaces.iter().rev() {
                    let _ = self.runtime.unregister_endpoint_map(&bindings, done);
                }
                for done in registered.iter().rev() {
                    let _ = self.runtime.unregister_interface(&bindings, &done.type_uuid);
                }
                inner.state = ServerState::BindingsAcquired;
                return Err(RpcError::new(
                    ErrorKind::RegistrationError,
                    describe(status, "Failed to register RPC endpoint map", Some(interface_handle)),
                ));
            }
            registered_interfaces.push(interface_handle.clone());
        }
        inner.state = ServerState::IntfRegLocalEndptMap;

        // Stage C: start accepting calls.
        if let Err(status) = self.runtime.begin_listen(&bindings) {
            for done in registered_interfaces.iter().rev() {
                let _ = self.runtime.unregister_endpoint_map(&bindings, done);
            }
            for done in registered.iter().rev() {
                let _ = self.runtime.unregister_interface(&bindings, &done.type_uuid);
            }
            inner.state = ServerState::BindingsAcquired;
            return Err(RpcError::new(
                ErrorKind::RegistrationError,
                describe(status, "Failed to start listening for RPC calls", None),
            ));
        }
        inner.state = ServerState::Listening;
        inner.registered = registered;
        inner.registered_interfaces = registered_interfaces;

        self.logger.write(
            &format!("RPC server '{}' is now listening for {} object(s)", inner.service_name, objects.len()),
            LogPriority::Notice,
            None,
            false,
        );

        Ok(())
    }

    /// `Listening -> IntfRegLocalEndptMap`. Idempotent: a no-op when not
    /// currently listening.
    pub fn stop(&self) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ServerState::Listening {
            return Ok(());
        }
        let bindings = inner.bindings.clone().expect("bindings present while listening");
        self.runtime.stop_listen(&bindings).map_err(|status| {
            RpcError::new(ErrorKind::RuntimeTransient, describe(status, "Failed to stop RPC server listeners", None))
        })?;
        inner.state = ServerState::IntfRegLocalEndptMap;
        Ok(())
    }

    /// `IntfRegLocalEndptMap -> Listening`. Rejects calls from any other
    /// state.
    pub fn resume(&self) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ServerState::IntfRegLocalEndptMap {
            return Err(RpcError::configuration(
                "RpcServer::resume requires the server to be stopped (not listening) first",
            ));
        }
        let bindings = inner.bindings.clone().expect("bindings present in IntfRegLocalEndptMap state");
        self.runtime.resume_listen(&bindings).map_err(|status| {
            RpcError::new(ErrorKind::RuntimeTransient, describe(status, "Failed to resume RPC server listeners", None))
        })?;
        inner.state = ServerState::Listening;
        Ok(())
    }

    /// Blocks the calling thread until an external [`Self::stop`] ends
    /// listening.
    pub fn wait(&self) {
        let bindings = self.inner.lock().unwrap().bindings.clone();
        if let Some(bindings) = bindings {
            self.runtime.wait(&bindings);
        }
    }

    /// Walks the full teardown chain regardless of the current state,
    /// logging (never raising) on a failure in any single step, so that no
    /// resource is leaked just because a later unregistration failed.
    /// Idempotent: does nothing once already `NotInitialized`.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ServerState::NotInitialized {
            return;
        }

        let Some(bindings) = inner.bindings.take() else {
            inner.state = ServerState::NotInitialized;
            return;
        };

        if inner.state == ServerState::Listening {
            if let Err(status) = self.runtime.stop_listen(&bindings) {
                self.logger.write(
                    "failed to stop RPC server listeners during finalize",
                    LogPriority::Critical,
                    Some(&status.to_string()),
                    false,
                );
            }
            inner.state = inner.state.previous().expect("Listening always has a previous state");
        }

        for interface_handle in inner.registered_interfaces.drain(..).rev() {
            if let Err(status) = self.runtime.unregister_endpoint_map(&bindings, &interface_handle) {
                self.logger.write(
                    "failed to unregister RPC endpoint map entry during finalize",
                    LogPriority::Critical,
                    Some(&status.to_string()),
                    false,
                );
            }
        }
        if inner.state == ServerState::IntfRegLocalEndptMap {
            inner.state = inner.state.previous().expect("IntfRegLocalEndptMap always has a previous state");
        }

        for object in inner.registered.drain(..).rev() {
            if let Err(status) = self.runtime.unregister_interface(&bindings, &object.type_uuid) {
                self.logger.write(
                    "failed to unregister RPC interface during finalize",
                    LogPriority::Critical,
                    Some(&status.to_string()),
                    false,
                );
            }
        }
        if inner.state == ServerState::IntfRegRuntimeLib {
            inner.state = inner.state.previous().expect("IntfRegRuntimeLib always has a previous state");
        }

        self.runtime.release_bindings(bindings);
        inner.credentials = None;
        inner.cert_store = None;
        inner.state = inner.state.previous().unwrap_or(ServerState::NotInitialized);
    }

    /// The server's authorization callback (spec section 4.8): queries the
    /// call's effective authentication level and denies it if strictly
    /// below `required_auth_level`. A panic while inquiring is treated the
    /// same as a denial.
    pub fn authorize_call(&self, call_handle: &BindingHandle) -> bool {
        let required = self.required_auth_level();
        let runtime = Arc::clone(&self.runtime);
        let handle = call_handle.clone();

        let effective = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runtime.inquire_auth_level(&handle)));

        match effective {
            Ok(level) => level >= required,
            Err(_) => false,
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.finalize();
        SERVER_EXISTS.store(false, Ordering::SeqCst);
    }
}

fn annotation_from(service_name: &str) -> String {
    if service_name.len() <= 63 {
        return service_name.to_owned();
    }
    let mut end = 63;
    while !service_name.is_char_boundary(end) {
        end -= 1;
    }
    service_name[..end].to_owned()
}
