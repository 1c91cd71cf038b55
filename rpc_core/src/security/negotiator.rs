// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Chooses authentication service, QOS options and identity-tracking mode
//! given transport, requested security, and directory availability — the
//! rule tables from spec section 4.6, both client- and server-side.

use rpc_wire::ProtocolSequence;

use crate::error::{LogPriority, Logger, RpcError};
use crate::types::AuthenticationSecurity;

/// Security quality-of-service capability bits a client negotiates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QosCapabilities {
    pub mutual_authn: bool,
    /// Set only for `Local` transport with `RequireMutualAuthn` and a
    /// directory service available (spec section 4.6, rule 2).
    pub local_hint: bool,
}

/// `Static` re-uses identity across calls on the same handle; `Dynamic`
/// re-resolves it on every call (a local peer may be short-lived).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityTracking {
    Static,
    Dynamic,
}

impl IdentityTracking {
    fn for_transport(protocol: ProtocolSequence) -> Self {
        match protocol {
            ProtocolSequence::Tcp => IdentityTracking::Static,
            ProtocolSequence::Local => IdentityTracking::Dynamic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNegotiation {
    pub effective_auth_service: String,
    pub qos: QosCapabilities,
    pub identity_tracking: IdentityTracking,
    pub spn_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNegotiation {
    pub effective_auth_service: String,
    pub identity_tracking: IdentityTracking,
    /// `Some` when the directory is available and the runtime must
    /// register an SPN, formed from `service_name` and the host's FQDN.
    pub spn: Option<String>,
}

pub struct SecurityNegotiator;

impl SecurityNegotiator {
    /// Client-side rule table (spec section 4.6).
    pub fn negotiate_client(
        transport: ProtocolSequence,
        requested: AuthenticationSecurity,
        directory_available: bool,
        logger: &dyn Logger,
    ) -> Result<ClientNegotiation, RpcError> {
        // Rule 1: requested = NTLM short-circuits everything else.
        if requested == AuthenticationSecurity::Ntlm {
            return Ok(ClientNegotiation {
                effective_auth_service: "NTLM".to_owned(),
                qos: QosCapabilities::default(),
                identity_tracking: IdentityTracking::for_transport(transport),
                spn_required: false,
            });
        }

        let identity_tracking = IdentityTracking::for_transport(transport);

        match transport {
            // Rule 2: Local transport never uses Kerberos.
            ProtocolSequence::Local => {
                let mut qos = QosCapabilities::default();

                if requested == AuthenticationSecurity::RequireMutualAuthn {
                    if directory_available {
                        qos.mutual_authn = true;
                        qos.local_hint = true;
                    } else {
                        return Err(RpcError::configuration(
                            "could not fulfill mutual authentication requirement: \
                             Active Directory services are not available",
                        ));
                    }
                }

                Ok(ClientNegotiation {
                    effective_auth_service: "NTLM".to_owned(),
                    qos,
                    identity_tracking,
                    spn_required: qos.mutual_authn,
                })
            }

            // Rule 3: TCP.
            ProtocolSequence::Tcp => {
                if directory_available {
                    let service = match requested {
                        AuthenticationSecurity::TryKerberos => "Negotiate",
                        AuthenticationSecurity::RequireMutualAuthn => "Kerberos",
                        AuthenticationSecurity::Ntlm | AuthenticationSecurity::SecureChannel => {
                            unreachable!("NTLM handled above; SecureChannel uses a separate path")
                        }
                    };

                    Ok(ClientNegotiation {
                        effective_auth_service: service.to_owned(),
                        qos: QosCapabilities {
                            mutual_authn: true,
                            local_hint: false,
                        },
                        identity_tracking,
                        spn_required: true,
                    })
                } else if requested == AuthenticationSecurity::RequireMutualAuthn {
                    Err(RpcError::configuration(
                        "could not fulfill mutual authentication requirement: \
                         Active Directory services are not available",
                    ))
                } else {
                    logger.write(
                        "Active Directory is unavailable; downgrading RPC client security to NTLM",
                        LogPriority::Notice,
                        None,
                        false,
                    );
                    Ok(ClientNegotiation {
                        effective_auth_service: "NTLM".to_owned(),
                        qos: QosCapabilities::default(),
                        identity_tracking,
                        spn_required: false,
                    })
                }
            }
        }
    }

    /// Server-side rule table (spec section 4.6).
    pub fn negotiate_server(
        transport: ProtocolSequence,
        directory_available: bool,
        service_name: &str,
        host_fqdn: &str,
    ) -> ServerNegotiation {
        let identity_tracking = IdentityTracking::for_transport(transport);

        if directory_available {
            ServerNegotiation {
                effective_auth_service: "Negotiate".to_owned(),
                identity_tracking,
                spn: Some(format!("{service_name}/{host_fqdn}")),
            }
        } else {
            ServerNegotiation {
                effective_auth_service: "NTLM".to_owned(),
                identity_tracking,
                spn: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogCrateLogger;

    #[test]
    fn local_with_required_mutual_authn_and_no_directory_fails() {
        let err = SecurityNegotiator::negotiate_client(
            ProtocolSequence::Local,
            AuthenticationSecurity::RequireMutualAuthn,
            false,
            &LogCrateLogger,
        )
        .unwrap_err();
        assert!(err.record.primary_message.contains("mutual authentication"));
    }

    #[test]
    fn tcp_with_ntlm_never_requires_mutual_authn_or_spn() {
        let result = SecurityNegotiator::negotiate_client(
            ProtocolSequence::Tcp,
            AuthenticationSecurity::Ntlm,
            true,
            &LogCrateLogger,
        )
        .unwrap();
        assert!(!result.qos.mutual_authn);
        assert!(!result.spn_required);
    }

    #[test]
    fn none_level_is_handled_upstream_not_here() {
        // AuthenticationLevel::None skips the negotiator entirely; see
        // RpcClient's constructor. Nothing to assert at this layer.
    }

    #[test]
    fn tcp_try_kerberos_without_directory_downgrades_to_ntlm() {
        let result = SecurityNegotiator::negotiate_client(
            ProtocolSequence::Tcp,
            AuthenticationSecurity::TryKerberos,
            false,
            &LogCrateLogger,
        )
        .unwrap();
        assert_eq!(result.effective_auth_service, "NTLM");
        assert!(!result.qos.mutual_authn);
    }

    #[test]
    fn tcp_try_kerberos_with_directory_uses_negotiate() {
        let result = SecurityNegotiator::negotiate_client(
            ProtocolSequence::Tcp,
            AuthenticationSecurity::TryKerberos,
            true,
            &LogCrateLogger,
        )
        .unwrap();
        assert_eq!(result.effective_auth_service, "Negotiate");
        assert!(result.qos.mutual_authn);
    }

    #[test]
    fn identity_tracking_is_dynamic_on_local_and_static_on_tcp() {
        let local = SecurityNegotiator::negotiate_client(
            ProtocolSequence::Local,
            AuthenticationSecurity::Ntlm,
            true,
            &LogCrateLogger,
        )
        .unwrap();
        let tcp = SecurityNegotiator::negotiate_client(
            ProtocolSequence::Tcp,
            AuthenticationSecurity::Ntlm,
            true,
            &LogCrateLogger,
        )
        .unwrap();
        assert_eq!(local.identity_tracking, IdentityTracking::Dynamic);
        assert_eq!(tcp.identity_tracking, IdentityTracking::Static);
    }

    #[test]
    fn server_side_prefers_negotiate_with_spn_when_directory_available() {
        let result = SecurityNegotiator::negotiate_server(ProtocolSequence::Tcp, true, "acme", "host.example.com");
        assert_eq!(result.effective_auth_service, "Negotiate");
        assert_eq!(result.spn.as_deref(), Some("acme/host.example.com"));
    }

    #[test]
    fn server_side_falls_back_to_ntlm_without_directory() {
        let result = SecurityNegotiator::negotiate_server(ProtocolSequence::Local, false, "acme", "host");
        assert_eq!(result.effective_auth_service, "NTLM");
        assert!(result.spn.is_none());
    }
}
