// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Opens a named system certificate store and looks up certificates by
//! subject (spec section 4.2).
//!
//! No portable, dependency-light crate in the retrieval pack opens a real
//! OS certificate store across platforms without locking the crate to one
//! (Windows' `schannel` crate is Windows-only). This is modeled as a
//! [`CertStoreBackend`] trait plus [`InMemoryCertStoreBackend`], a reference
//! implementation good enough to exercise every invariant — see
//! `DESIGN.md`'s Open Question resolution. A real backend (`schannel` on
//! Windows, `security-framework` on macOS, `openssl` elsewhere) plugs in at
//! the same trait boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::RpcError;
use crate::types::StoreLocation;

/// Opaque handle to a store opened through a [`CertStoreBackend`].
pub type StoreHandle = u64;
/// Opaque handle to a certificate obtained from a store.
pub type CertHandle = u64;

/// The operations a certificate-store implementation must provide.
pub trait CertStoreBackend: Send + Sync {
    fn open_store(&self, location: StoreLocation, name: &str) -> Result<StoreHandle, RpcError>;
    /// `Ok(None)` is "not found", distinct from an underlying lookup
    /// failure (`Err`).
    fn find_by_subject(&self, store: StoreHandle, subject: &str) -> Result<Option<CertHandle>, RpcError>;
    fn release_certificate(&self, cert: CertHandle);
    fn close_store(&self, store: StoreHandle);
}

/// A handle owned by a [`CertificateStore`]: drop releases it. Holds a
/// clone of the backend `Arc` so the backend's bookkeeping for this
/// certificate cannot outlive the backend itself, matching spec section
/// 3's invariant that a certificate context is released before its store.
pub struct CertificateContext {
    backend: Arc<dyn CertStoreBackend>,
    handle: CertHandle,
}

impl Drop for CertificateContext {
    fn drop(&mut self) {
        self.backend.release_certificate(self.handle);
    }
}

/// An owned, named system certificate store.
pub struct CertificateStore {
    backend: Arc<dyn CertStoreBackend>,
    handle: StoreHandle,
}

impl CertificateStore {
    pub fn open(backend: Arc<dyn CertStoreBackend>, location: StoreLocation, name: &str) -> Result<Self, RpcError> {
        let handle = backend.open_store(location, name)?;
        Ok(Self { backend, handle })
    }

    /// Returns the first matching certificate whose subject string
    /// contains `subject`. `None` means not-found; any other failure
    /// surfaces as an error.
    pub fn find_by_subject(&self, subject: &str) -> Result<Option<CertificateContext>, RpcError> {
        let found = self.backend.find_by_subject(self.handle, subject)?;
        Ok(found.map(|handle| CertificateContext {
            backend: Arc::clone(&self.backend),
            handle,
        }))
    }
}

impl Drop for CertificateStore {
    fn drop(&mut self) {
        self.backend.close_store(self.handle);
    }
}

struct SeededCertificate {
    location: StoreLocation,
    store_name: String,
    subject: String,
}

/// In-memory reference [`CertStoreBackend`]. Certificates are seeded ahead
/// of time (`with_certificate`) the way a test would stand up a known
/// store, then looked up the same way a real backend would be.
#[derive(Default)]
pub struct InMemoryCertStoreBackend {
    next_handle: AtomicU64,
    seeded: Mutex<Vec<SeededCertificate>>,
    open_stores: Mutex<HashMap<StoreHandle, (StoreLocation, String)>>,
    open_certs: Mutex<HashMap<CertHandle, String>>,
}

impl InMemoryCertStoreBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificate(self, location: StoreLocation, store_name: &str, subject: &str) -> Self {
        self.seeded.lock().unwrap().push(SeededCertificate {
            location,
            store_name: store_name.to_owned(),
            subject: subject.to_owned(),
        });
        self
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl CertStoreBackend for InMemoryCertStoreBackend {
    fn open_store(&self, location: StoreLocation, name: &str) -> Result<StoreHandle, RpcError> {
        let handle = self.next();
        self.open_stores.lock().unwrap().insert(handle, (location, name.to_owned()));
        Ok(handle)
    }

    fn find_by_subject(&self, store: StoreHandle, subject: &str) -> Result<Option<CertHandle>, RpcError> {
        let stores = self.open_stores.lock().unwrap();
        let Some((location, name)) = stores.get(&store) else {
            return Err(RpcError::configuration("certificate store handle is not open"));
        };

        let seeded = self.seeded.lock().unwrap();
        let found = seeded
            .iter()
            .find(|c| c.location == *location && &c.store_name == name && c.subject.contains(subject));

        match found {
            None => Ok(None),
            Some(cert) => {
                let handle = self.next();
                self.open_certs.lock().unwrap().insert(handle, cert.subject.clone());
                Ok(Some(handle))
            }
        }
    }

    fn release_certificate(&self, cert: CertHandle) {
        self.open_certs.lock().unwrap().remove(&cert);
    }

    fn close_store(&self, store: StoreHandle) {
        self.open_stores.lock().unwrap().remove(&store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_seeded_certificate_by_subject_substring() {
        let backend: Arc<dyn CertStoreBackend> = Arc::new(
            InMemoryCertStoreBackend::new().with_certificate(StoreLocation::LocalMachine, "MY", "CN=TARS, O=Acme"),
        );
        let store = CertificateStore::open(backend, StoreLocation::LocalMachine, "MY").unwrap();

        let found = store.find_by_subject("TARS").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn not_found_is_distinct_from_an_error() {
        let backend: Arc<dyn CertStoreBackend> = Arc::new(InMemoryCertStoreBackend::new());
        let store = CertificateStore::open(backend, StoreLocation::CurrentUser, "MY").unwrap();

        assert!(store.find_by_subject("nothing-here").unwrap().is_none());
    }

    #[test]
    fn certificate_context_can_be_released_before_its_store() {
        let backend: Arc<dyn CertStoreBackend> = Arc::new(
            InMemoryCertStoreBackend::new().with_certificate(StoreLocation::LocalMachine, "MY", "CN=TARS"),
        );
        let store = CertificateStore::open(backend, StoreLocation::LocalMachine, "MY").unwrap();
        let cert = store.find_by_subject("TARS").unwrap().unwrap();

        drop(cert);
        drop(store);
    }
}
