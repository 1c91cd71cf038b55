// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! End-to-end scenarios from the testable-properties list: a client and a
//! server sharing one scripted [`RpcRuntime`], exercising the retry/
//! reconnect engine, impersonation, and Schannel credential lifetimes
//! together rather than module-by-module.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rpc_core::client::RpcClient;
use rpc_core::config::RpcConfig;
use rpc_core::error::{ErrorKind, LogPriority, Logger};
use rpc_core::security::{CertHandle, CertStoreBackend, InMemoryCertStoreBackend, StoreHandle};
use rpc_core::server::impersonation::ImpersonationScope;
use rpc_core::server::{RpcServer, ServerSecurity};
use rpc_core::types::{AuthenticationSecurity, CertInfo, ImpersonationLevel, RpcSrvObject, StoreLocation};
use rpc_wire::{AuthLevel, BindingHandle, ProtocolSequence, RpcRuntime, RpcStatus, SecurityContext, ServerBindings};

struct RecordingLogger {
    entries: Mutex<Vec<(LogPriority, String)>>,
}

impl RecordingLogger {
    fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    fn above_notice(&self) -> Vec<(LogPriority, String)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| matches!(p, LogPriority::Warning | LogPriority::Error | LogPriority::Critical | LogPriority::Fatal))
            .cloned()
            .collect()
    }

    fn count_containing(&self, needle: &str) -> usize {
        self.entries.lock().unwrap().iter().filter(|(_, m)| m.contains(needle)).count()
    }
}

impl Logger for RecordingLogger {
    fn write(&self, message: &str, priority: LogPriority, _details: Option<&str>, _with_stack_trace: bool) {
        self.entries.lock().unwrap().push((priority, message.to_owned()));
    }
}

/// A scripted [`RpcRuntime`]: server-facing calls always succeed, and
/// client-facing `invoke` either runs the stub directly or returns the next
/// status from a pre-loaded script, letting one fake stand in for "the OS
/// RPC runtime" across every scenario below.
struct FakeRuntime {
    scripted: Mutex<Vec<RpcStatus>>,
    invocations: AtomicU32,
}

impl FakeRuntime {
    fn new(scripted: Vec<RpcStatus>) -> Self {
        Self { scripted: Mutex::new(scripted), invocations: AtomicU32::new(0) }
    }
}

impl RpcRuntime for FakeRuntime {
    fn compose_and_bind(&self, protocol: ProtocolSequence, object_uuid: Option<&str>, destination: &str, endpoint: Option<&str>) -> Result<BindingHandle, RpcStatus> {
        Ok(BindingHandle::new(protocol, object_uuid.map(str::to_owned), destination.to_owned(), endpoint.map(str::to_owned)))
    }
    fn reset_bindings(&self, handle: &mut BindingHandle) -> Result<(), RpcStatus> {
        handle.reset_endpoint();
        Ok(())
    }
    fn release_binding(&self, _: BindingHandle) {}
    fn apply_security(&self, handle: &mut BindingHandle, security: SecurityContext) -> Result<(), RpcStatus> {
        handle.set_security(security);
        Ok(())
    }
    fn invoke(&self, _tag: &str, handle: &BindingHandle, stub: &mut dyn FnMut(&BindingHandle) -> Result<(), RpcStatus>) -> RpcStatus {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let scripted_next = {
            let mut scripted = self.scripted.lock().unwrap();
            if scripted.is_empty() { None } else { Some(scripted.remove(0)) }
        };
        if let Some(status) = scripted_next {
            return status;
        }

        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| stub(handle))) {
            Ok(Ok(())) => RpcStatus::Ok,
            Ok(Err(status)) => status,
            Err(_) => RpcStatus::Fatal,
        }
    }
    fn inquire_bindings(&self, protocol: ProtocolSequence) -> Result<ServerBindings, RpcStatus> {
        Ok(ServerBindings::new(protocol, vec!["test-addr".into()]))
    }
    fn register_interface(&self, _: &ServerBindings, _: &str) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn unregister_interface(&self, _: &ServerBindings, _: &str) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn register_endpoint_map(&self, _: &ServerBindings, _: &str, _: &str) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn unregister_endpoint_map(&self, _: &ServerBindings, _: &str) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn release_bindings(&self, _: ServerBindings) {}
    fn begin_listen(&self, _: &ServerBindings) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn stop_listen(&self, _: &ServerBindings) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn resume_listen(&self, _: &ServerBindings) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn wait(&self, _: &ServerBindings) {}
    fn impersonate(&self, _: &BindingHandle) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn revert_to_self(&self, _: &BindingHandle) -> Result<(), RpcStatus> {
        Ok(())
    }
    fn inquire_auth_level(&self, _: &BindingHandle) -> AuthLevel {
        AuthLevel::Integrity
    }
}

fn test_config() -> RpcConfig {
    RpcConfig {
        cli_call_max_retries: 2,
        cli_call_retry_sleep_ms: 1,
        cli_call_retry_time_slot_ms: 1,
        cli_srv_connect_max_retries: 3,
        cli_srv_conn_retry_sleep_secs: 0,
        cli_call_retry_max_backoff_ms: 50,
    }
}

// S1: no auth, happy path — no log entries above Notice.
#[test]
fn s1_no_auth_happy_path_logs_nothing_above_notice() {
    let runtime: Arc<dyn RpcRuntime> = Arc::new(FakeRuntime::new(vec![]));
    let logger = Arc::new(RecordingLogger::new());

    let server = RpcServer::new(Arc::clone(&runtime), logger.clone()).unwrap();
    server.initialize(ProtocolSequence::Local, "acme", AuthLevel::None, ServerSecurity::None).unwrap();
    server
        .start(vec![RpcSrvObject { object_uuid: "U1".into(), interface_handle: "IF_ACME".into(), epv: Some("EPV1".into()) }])
        .unwrap();

    let client = RpcClient::new(Arc::clone(&runtime), logger.clone(), test_config(), ProtocolSequence::Local, "U1", "localhost", None).unwrap();

    let mut result = 0.0f64;
    client
        .call("multiply", &mut |_| {
            result = 6.0 * 116.0;
            Ok(())
        })
        .unwrap();
    assert_eq!(result, 696.0);

    server.stop().unwrap();
    server.finalize();

    assert!(logger.above_notice().is_empty(), "unexpected log entries: {:?}", logger.above_notice());
}

// S2: NTLM/Integrity, impersonation scope used inside the call.
#[test]
fn s2_ntlm_integrity_call_uses_an_impersonation_scope() {
    let runtime: Arc<dyn RpcRuntime> = Arc::new(FakeRuntime::new(vec![]));
    let logger = Arc::new(RecordingLogger::new());

    let dir = std::env::temp_dir();
    let marker = dir.join(format!("rpc-core-s2-{}.marker", std::process::id()));
    let _ = std::fs::remove_file(&marker);

    let client = RpcClient::new_with_windows_sec(
        Arc::clone(&runtime),
        logger.clone(),
        test_config(),
        ProtocolSequence::Local,
        "U1",
        "localhost",
        AuthenticationSecurity::Ntlm,
        AuthLevel::Integrity,
        ImpersonationLevel::Impersonate,
        None,
        None,
        &rpc_core::security::FixedDirectoryProbe::unavailable(),
    )
    .unwrap();

    let marker_path = marker.clone();
    client
        .call("change_case", &mut move |handle| {
            let scope = ImpersonationScope::enter(handle, Arc::clone(&runtime), logger.clone() as Arc<dyn Logger>)
                .map_err(|_| RpcStatus::AccessDenied)?;
            std::fs::write(&marker_path, b"ok").map_err(|_| RpcStatus::Fatal)?;
            drop(scope);
            Ok(())
        })
        .unwrap();

    assert!(marker.exists());
    let _ = std::fs::remove_file(&marker);
}

// S4: the server goes away mid-outage and comes back; the client logs
// "lost its connection" exactly once and "reconnected" exactly once.
#[test]
fn s4_reconnect_after_outage_logs_exactly_once_each_way() {
    let runtime = Arc::new(FakeRuntime::new(vec![RpcStatus::ServerUnavailable, RpcStatus::ServerUnavailable]));
    let runtime_dyn: Arc<dyn RpcRuntime> = runtime.clone();
    let logger = Arc::new(RecordingLogger::new());

    let client = RpcClient::new(runtime_dyn, logger.clone(), test_config(), ProtocolSequence::Local, "U1", "localhost", None).unwrap();

    let result = client.call("ping", &mut |_| Ok(()));
    assert!(result.is_ok());

    assert_eq!(logger.count_containing("lost its connection"), 1);
    assert_eq!(logger.count_containing("reconnected after"), 1);
}

// S5: server always busy, retry budget exhausted after exactly 3 attempts.
#[test]
fn s5_retry_budget_exhausted_after_exactly_three_attempts() {
    let runtime = Arc::new(FakeRuntime::new(vec![RpcStatus::ServerTooBusy, RpcStatus::ServerTooBusy, RpcStatus::ServerTooBusy]));
    let runtime_dyn: Arc<dyn RpcRuntime> = runtime.clone();
    let logger = Arc::new(RecordingLogger::new());

    let client = RpcClient::new(runtime_dyn, logger, test_config(), ProtocolSequence::Local, "U1", "localhost", None).unwrap();

    let err = client.call("heavy", &mut |_| Ok(())).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RuntimeTransient);
    assert_eq!(runtime.invocations.load(Ordering::SeqCst), 3);
}

struct EventLoggingBackend {
    inner: InMemoryCertStoreBackend,
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl CertStoreBackend for EventLoggingBackend {
    fn open_store(&self, location: StoreLocation, name: &str) -> Result<StoreHandle, rpc_core::error::RpcError> {
        self.events.lock().unwrap().push("open_store");
        self.inner.open_store(location, name)
    }
    fn find_by_subject(&self, store: StoreHandle, subject: &str) -> Result<Option<CertHandle>, rpc_core::error::RpcError> {
        self.inner.find_by_subject(store, subject)
    }
    fn release_certificate(&self, cert: CertHandle) {
        self.events.lock().unwrap().push("release_certificate");
        self.inner.release_certificate(cert);
    }
    fn close_store(&self, store: StoreHandle) {
        self.events.lock().unwrap().push("close_store");
        self.inner.close_store(store);
    }
}

// S6: Schannel client/server, credential + certificate context released
// before the store on drop.
#[test]
fn s6_schannel_call_and_client_drop_order() {
    let runtime: Arc<dyn RpcRuntime> = Arc::new(FakeRuntime::new(vec![]));
    let logger = Arc::new(RecordingLogger::new());
    let events = Arc::new(Mutex::new(Vec::new()));

    let server_backend: Arc<dyn CertStoreBackend> = Arc::new(EventLoggingBackend {
        inner: InMemoryCertStoreBackend::new().with_certificate(StoreLocation::LocalMachine, "MY", "CN=TARS"),
        events: Arc::clone(&events),
    });
    let server = RpcServer::new(Arc::clone(&runtime), logger.clone()).unwrap();
    let server_cert_info = CertInfo {
        store_location: StoreLocation::LocalMachine,
        store_name: "MY".into(),
        subject: "TARS".into(),
        stronger_security: true,
    };
    server
        .initialize(
            ProtocolSequence::Tcp,
            "acme",
            AuthLevel::Privacy,
            ServerSecurity::Tls { cert_info: &server_cert_info, cert_backend: Arc::clone(&server_backend) },
        )
        .unwrap();
    server
        .start(vec![RpcSrvObject { object_uuid: "U1".into(), interface_handle: "IF_ACME".into(), epv: None }])
        .unwrap();

    let client_backend: Arc<dyn CertStoreBackend> = Arc::new(EventLoggingBackend {
        inner: InMemoryCertStoreBackend::new().with_certificate(StoreLocation::LocalMachine, "MY", "CN=TARS"),
        events: Arc::clone(&events),
    });
    let cert_info = CertInfo {
        store_location: StoreLocation::LocalMachine,
        store_name: "MY".into(),
        subject: "TARS".into(),
        stronger_security: true,
    };

    let client = RpcClient::new_with_tls(
        Arc::clone(&runtime),
        logger.clone(),
        test_config(),
        ProtocolSequence::Tcp,
        "U1",
        "localhost",
        &cert_info,
        client_backend,
        AuthLevel::Privacy,
        None,
    )
    .unwrap();

    let mut result = 0i64;
    client
        .call("operate", &mut |_| {
            result = 606 + 90;
            Ok(())
        })
        .unwrap();
    assert_eq!(result, 696);

    drop(client);

    server.finalize();

    let events = events.lock().unwrap();
    let release_index = events.iter().position(|e| *e == "release_certificate").unwrap();
    let close_index = events.iter().position(|e| *e == "close_store").unwrap();
    assert!(release_index < close_index, "certificate must be released before its store closes: {events:?}");
}
