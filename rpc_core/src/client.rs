// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Explicit-binding RPC client: composes a binding string, applies
//! security, invokes the stub, and runs the retry/reconnect loop (spec
//! section 4.7), grounded on `rpc_impl_client.cpp`'s
//! `RpcClient::Call`/`WrapRpc`/`ResetBindings`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpc_wire::{BindingHandle, ProtocolSequence, RpcRuntime, RpcStatus, SecurityContext};

use crate::config::RpcConfig;
use crate::error::{throw_if, ErrorKind, LogPriority, Logger, RpcError};
use crate::retry::{RetryPolicy, RetryVerdict};
use crate::security::cert_store::CertificateStore;
use crate::security::directory_probe::DirectoryProbe;
use crate::security::negotiator::SecurityNegotiator;
use crate::security::ChannelCredentials;
use crate::types::{schannel_compatible_with, AuthenticationSecurity, CertInfo, ImpersonationLevel};
use rpc_wire::AuthLevel;

/// An explicit-binding RPC client. Owns its binding handle and, for
/// Schannel clients, its credential and certificate context. Not
/// internally synchronized: concurrent calls on the same client must be
/// externally serialized (spec section 5).
pub struct RpcClient {
    runtime: Arc<dyn RpcRuntime>,
    logger: Arc<dyn Logger>,
    config: RpcConfig,
    binding: Mutex<Option<BindingHandle>>,
    endpoint_label: String,
    // Field order matters: credentials (and the certificate context they
    // hold) must drop before the store they came from.
    schannel_credentials: Option<ChannelCredentials>,
    schannel_store: Option<CertificateStore>,
}

impl RpcClient {
    /// Basic constructor: no security options (spec section 4.7).
    pub fn new(
        runtime: Arc<dyn RpcRuntime>,
        logger: Arc<dyn Logger>,
        config: RpcConfig,
        protocol: ProtocolSequence,
        object_uuid: &str,
        destination: &str,
        endpoint: Option<&str>,
    ) -> Result<Self, RpcError> {
        let object_uuid_opt = if object_uuid.is_empty() { None } else { Some(object_uuid) };

        let binding = runtime
            .compose_and_bind(protocol, object_uuid_opt, destination, endpoint)
            .map_err(|status| RpcError::new(ErrorKind::BindingError, crate::error::describe(status, "Failed to compose binding string for RPC client", None)))?;

        let endpoint_label = format!("{object_uuid}#{protocol}@{destination}");

        logger.write(
            &format!("RPC client for object '{object_uuid}' in '{destination}' will use protocol sequence '{protocol}'"),
            LogPriority::Notice,
            None,
            false,
        );

        Ok(Self {
            runtime,
            logger,
            config,
            binding: Mutex::new(Some(binding)),
            endpoint_label,
            schannel_credentials: None,
            schannel_store: None,
        })
    }

    /// Windows-SSP security constructor (NTLM/Negotiate/Kerberos), spec
    /// section 4.7/4.6.
    #[allow(clippy::too_many_arguments)]
    pub fn new_with_windows_sec(
        runtime: Arc<dyn RpcRuntime>,
        logger: Arc<dyn Logger>,
        config: RpcConfig,
        protocol: ProtocolSequence,
        object_uuid: &str,
        destination: &str,
        auth_security: AuthenticationSecurity,
        auth_level: AuthLevel,
        impersonation: ImpersonationLevel,
        spn: Option<&str>,
        endpoint: Option<&str>,
        directory_probe: &dyn DirectoryProbe,
    ) -> Result<Self, RpcError> {
        let mut client = Self::new(runtime, logger, config, protocol, object_uuid, destination, endpoint)?;

        // auth_level = None: no credential, SPN, or impersonation field has
        // any effect (spec section 3's invariant).
        if auth_level == AuthLevel::None {
            return Ok(client);
        }

        let needs_directory_check = (protocol == ProtocolSequence::Tcp && auth_security != AuthenticationSecurity::Ntlm)
            || (protocol == ProtocolSequence::Local && auth_security == AuthenticationSecurity::RequireMutualAuthn);

        let directory_available = if needs_directory_check {
            directory_probe.detect(true)?
        } else {
            false
        };

        let negotiation =
            SecurityNegotiator::negotiate_client(protocol, auth_security, directory_available, client.logger.as_ref())?;

        if negotiation.spn_required && spn.is_none() {
            return Err(RpcError::configuration(
                "no SPN was provided to RPC client for mutual authentication",
            ));
        }

        if negotiation.spn_required {
            client.logger.write(
                &format!("RPC client has to authenticate server '{}'", spn.unwrap_or_default()),
                LogPriority::Notice,
                None,
                false,
            );
        }

        let security = SecurityContext {
            auth_service: negotiation.effective_auth_service,
            mutual_authn: negotiation.qos.mutual_authn,
            dynamic_identity_tracking: negotiation.identity_tracking == crate::security::IdentityTracking::Dynamic,
            spn: spn.map(str::to_owned),
            credential_id: None,
            impersonation_level: impersonation,
        };

        client.apply_security(security)?;

        Ok(client)
    }

    /// Schannel (TLS with X.509) constructor, spec section 4.7/4.2/4.3.
    /// `SecureChannel` is only compatible with TCP transport (spec section
    /// 3's invariant).
    #[allow(clippy::too_many_arguments)]
    pub fn new_with_tls(
        runtime: Arc<dyn RpcRuntime>,
        logger: Arc<dyn Logger>,
        config: RpcConfig,
        protocol: ProtocolSequence,
        object_uuid: &str,
        destination: &str,
        cert_info: &CertInfo,
        cert_backend: Arc<dyn crate::security::CertStoreBackend>,
        auth_level: AuthLevel,
        endpoint: Option<&str>,
    ) -> Result<Self, RpcError> {
        if !schannel_compatible_with(protocol) {
            return Err(RpcError::configuration(
                "SecureChannel security is only compatible with TCP transport",
            ));
        }

        let mut client = Self::new(runtime, logger, config, protocol, object_uuid, destination, endpoint)?;

        if auth_level == AuthLevel::None {
            return Ok(client);
        }

        let store = CertificateStore::open(cert_backend, cert_info.store_location, &cert_info.store_name)?;
        let certificate = store
            .find_by_subject(&cert_info.subject)?
            .ok_or_else(|| RpcError::new(ErrorKind::SecurityError, crate::error::ErrorRecord {
                primary_message: format!("no certificate found matching subject '{}'", cert_info.subject),
                detail: None,
                extended: Vec::new(),
                extended_chain_note: None,
            }))?;

        let credentials = ChannelCredentials::for_client(certificate, cert_info.stronger_security);

        client.apply_security(SecurityContext {
            auth_service: "Schannel".to_owned(),
            mutual_authn: true,
            dynamic_identity_tracking: false,
            spn: None,
            credential_id: Some(1),
            impersonation_level: ImpersonationLevel::default(),
        })?;

        client.schannel_credentials = Some(credentials);
        client.schannel_store = Some(store);

        Ok(client)
    }

    fn apply_security(&mut self, security: SecurityContext) -> Result<(), RpcError> {
        let mut guard = self.binding.lock().unwrap();
        let handle = guard.as_mut().expect("binding present while client is alive");
        self.runtime
            .apply_security(handle, security)
            .map_err(|status| RpcError::new(ErrorKind::SecurityError, crate::error::describe(status, "Failed to set security for RPC client", None)))
    }

    /// A human-readable endpoint label for diagnostics (not used for
    /// binding).
    pub fn endpoint_label(&self) -> &str {
        &self.endpoint_label
    }

    /// Strips the endpoint from the handle, leaving a partially-bound
    /// handle that re-resolves against the endpoint-map database on the
    /// next call. Idempotent.
    pub fn reset_bindings(&self) -> Result<(), RpcError> {
        let mut guard = self.binding.lock().unwrap();
        let handle = guard.as_mut().expect("binding present while client is alive");
        self.runtime
            .reset_bindings(handle)
            .map_err(|status| RpcError::new(ErrorKind::BindingError, crate::error::describe(status, "Failed to reset RPC client bindings", None)))
    }

    /// The core call algorithm (spec section 4.7): retries per
    /// [`RetryPolicy`], reconnecting up to `cli_srv_connect_max_retries`
    /// times on a `Reconnect` verdict, logging exactly once when entering
    /// the on-hold state and once when it recovers.
    pub fn call(
        &self,
        tag: &str,
        stub: &mut dyn FnMut(&BindingHandle) -> Result<(), RpcStatus>,
    ) -> Result<(), RpcError> {
        let mut attempts_connect = 0u32;
        let mut logged_on_hold = false;

        let status = loop {
            let status = self.wrap_with_retries(tag, stub);

            if RetryPolicy::classify(status) != RetryVerdict::Reconnect {
                break status;
            }
            if attempts_connect == self.config.cli_srv_connect_max_retries {
                break status;
            }

            if !logged_on_hold {
                self.logger.write(
                    &format!(
                        "RPC client for '{tag}' lost its connection; will try to reconnect every {}s",
                        self.config.cli_srv_conn_retry_sleep_secs
                    ),
                    LogPriority::Warning,
                    None,
                    false,
                );
                logged_on_hold = true;
            }

            let _ = self.reset_bindings();
            std::thread::sleep(Duration::from_secs(self.config.cli_srv_conn_retry_sleep_secs));
            attempts_connect += 1;
        };

        let result = throw_if(status, "Failed to invoke stub routine", Some(tag));

        if logged_on_hold && status.is_ok() {
            self.logger.write(
                &format!("RPC client for '{tag}' reconnected after {attempts_connect} attempt(s)"),
                LogPriority::Warning,
                None,
                false,
            );
        }

        result
    }

    fn wrap_with_retries(&self, tag: &str, stub: &mut dyn FnMut(&BindingHandle) -> Result<(), RpcStatus>) -> RpcStatus {
        let mut attempt = 0u32;

        loop {
            let status = {
                let guard = self.binding.lock().unwrap();
                let handle = guard.as_ref().expect("binding present while client is alive");
                self.runtime.invoke(tag, handle, stub)
            };

            if status.is_ok() {
                return status;
            }

            match RetryPolicy::classify(status) {
                RetryVerdict::SimpleRetry => {
                    if attempt >= self.config.cli_call_max_retries {
                        return status;
                    }
                    std::thread::sleep(Duration::from_millis(self.config.cli_call_retry_sleep_ms));
                }
                RetryVerdict::RetryBackoff => {
                    if attempt >= self.config.cli_call_max_retries {
                        return status;
                    }
                    std::thread::sleep(RetryPolicy::backoff_with_config(attempt, &self.config));
                }
                RetryVerdict::Reconnect | RetryVerdict::Quit => return status,
            }

            attempt += 1;
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(handle) = self.binding.lock().unwrap().take() {
            self.runtime.release_binding(handle);
        }
    }
}
