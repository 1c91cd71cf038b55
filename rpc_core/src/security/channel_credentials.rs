// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Owns an Schannel-style credential record (certificate + cipher/protocol
//! policy) for client or server use (spec section 4.3).

use crate::security::cert_store::{CertificateContext, CertificateStore};

/// A TLS credential record. Field order matters: `certificate` drops
/// before `root_store`, satisfying the invariant that a certificate
/// context is released before the store it came from.
pub struct ChannelCredentials {
    certificate: CertificateContext,
    root_store: Option<CertificateStore>,
    stronger_security: bool,
}

impl ChannelCredentials {
    /// Client credential: one certificate context, no root store.
    pub fn for_client(certificate: CertificateContext, stronger_security: bool) -> Self {
        Self {
            certificate,
            root_store: None,
            stronger_security,
        }
    }

    /// Server credential: needs the root store for chain validation in
    /// addition to its own certificate.
    pub fn for_server(root_store: CertificateStore, certificate: CertificateContext, stronger_security: bool) -> Self {
        Self {
            certificate,
            root_store: Some(root_store),
            stronger_security,
        }
    }

    /// When set, enables revocation-chain checks on the whole chain and
    /// disables weaker cipher suites; when clear, legacy peers are
    /// accepted.
    pub fn stronger_security(&self) -> bool {
        self.stronger_security
    }

    pub fn certificate(&self) -> &CertificateContext {
        &self.certificate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::cert_store::{CertStoreBackend, InMemoryCertStoreBackend};
    use crate::types::StoreLocation;
    use std::sync::Arc;

    #[test]
    fn client_credential_carries_no_root_store() {
        let backend: Arc<dyn CertStoreBackend> =
            Arc::new(InMemoryCertStoreBackend::new().with_certificate(StoreLocation::CurrentUser, "MY", "CN=client"));
        let store = CertificateStore::open(backend, StoreLocation::CurrentUser, "MY").unwrap();
        let cert = store.find_by_subject("client").unwrap().unwrap();

        let creds = ChannelCredentials::for_client(cert, true);
        assert!(creds.root_store.is_none());
        assert!(creds.stronger_security());
    }

    #[test]
    fn server_credential_drops_certificate_before_root_store() {
        let backend: Arc<dyn CertStoreBackend> = Arc::new(
            InMemoryCertStoreBackend::new().with_certificate(StoreLocation::LocalMachine, "MY", "CN=server"),
        );
        let store = CertificateStore::open(Arc::clone(&backend), StoreLocation::LocalMachine, "MY").unwrap();
        let cert = store.find_by_subject("server").unwrap().unwrap();
        let root_store = CertificateStore::open(backend, StoreLocation::LocalMachine, "Root").unwrap();

        let creds = ChannelCredentials::for_server(root_store, cert, false);
        drop(creds);
    }
}
