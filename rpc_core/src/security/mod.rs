// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Security-package negotiation and identity helpers (spec sections 4.2
//! through 4.6).

pub mod cert_store;
pub mod channel_credentials;
pub mod directory_probe;
pub mod negotiator;
pub mod uuid_vector;

pub use cert_store::{CertStoreBackend, CertHandle, CertificateContext, CertificateStore, InMemoryCertStoreBackend, StoreHandle};
pub use channel_credentials::ChannelCredentials;
pub use directory_probe::{DirectoryProbe, FixedDirectoryProbe};
pub use negotiator::{ClientNegotiation, IdentityTracking, QosCapabilities, SecurityNegotiator, ServerNegotiation};
pub use uuid_vector::{UuidVector, UUID_VECTOR_MAX_SIZE};
