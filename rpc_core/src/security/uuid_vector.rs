// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Bounded ordered collection of object UUIDs passed to the endpoint-map
//! call, grounded on `rpc_impl_util.cpp`'s `VectorOfUuids::Add`.

use crate::error::RpcError;

/// Platform limit on the endpoint-map call (spec section 3's invariant).
pub const UUID_VECTOR_MAX_SIZE: usize = 32;

/// Move-assignable, not copyable: cloning a collection of registered UUIDs
/// silently would misrepresent ownership of the endpoint-map registration.
#[derive(Debug, Default)]
pub struct UuidVector {
    entries: Vec<String>,
}

impl UuidVector {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends `uuid`, or fails with `CapacityExceeded` once the vector
    /// already holds [`UUID_VECTOR_MAX_SIZE`] entries.
    pub fn add(&mut self, uuid: impl Into<String>) -> Result<(), RpcError> {
        if self.entries.len() >= UUID_VECTOR_MAX_SIZE {
            return Err(RpcError::capacity_exceeded(format!(
                "UuidVector already holds the maximum of {UUID_VECTOR_MAX_SIZE} entries"
            )));
        }
        self.entries.push(uuid.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A contiguous view suitable for handing to the endpoint-map call
    /// (the platform-shaped header is the runtime's concern; this layer
    /// only guarantees contiguity and ordering).
    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_ok_iff_below_capacity() {
        let mut v = UuidVector::new();
        for i in 0..UUID_VECTOR_MAX_SIZE {
            v.add(format!("uuid-{i}")).unwrap();
        }
        assert_eq!(v.len(), UUID_VECTOR_MAX_SIZE);

        let err = v.add("uuid-overflow").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CapacityExceeded);
        assert_eq!(v.len(), UUID_VECTOR_MAX_SIZE);
    }
}
