// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Detects availability of a directory service, grounded on
//! `rpc_impl_util.cpp`'s `DetectActiveDirectoryServices`. A real
//! implementation binding to AD/LDAP is an external collaborator, like the
//! OS RPC runtime itself; this crate only defines the trait boundary plus
//! fixed test doubles.

use crate::error::RpcError;

/// A single best-effort directory-service probe.
pub trait DirectoryProbe {
    /// Returns `Ok(true)` if binding to the domain service succeeds,
    /// `Ok(false)` for the well-known "no such domain" case, or `Err` for
    /// any other classification.
    fn detect(&self, is_client: bool) -> Result<bool, RpcError>;
}

/// A probe that always reports the same outcome, for tests exercising the
/// security negotiator's directory-dependent branches.
pub struct FixedDirectoryProbe {
    outcome: Result<bool, &'static str>,
}

impl FixedDirectoryProbe {
    pub fn available() -> Self {
        Self { outcome: Ok(true) }
    }

    pub fn unavailable() -> Self {
        Self { outcome: Ok(false) }
    }

    pub fn failing(message: &'static str) -> Self {
        Self { outcome: Err(message) }
    }
}

impl DirectoryProbe for FixedDirectoryProbe {
    fn detect(&self, _is_client: bool) -> Result<bool, RpcError> {
        match self.outcome {
            Ok(available) => Ok(available),
            Err(message) => Err(RpcError::configuration(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_probe_reports_what_it_was_built_with() {
        assert_eq!(FixedDirectoryProbe::available().detect(true).unwrap(), true);
        assert_eq!(FixedDirectoryProbe::unavailable().detect(true).unwrap(), false);
        assert!(FixedDirectoryProbe::failing("ldap down").detect(true).is_err());
    }
}
