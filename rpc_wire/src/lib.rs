// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Stand-in for "the OS RPC runtime" and "the IDL-generated stubs" that the
//! RPC core wrapper (see the `rpc_core` crate) treats as external
//! collaborators reached through a narrow interface. Nothing in this crate
//! is part of the specified wrapper behavior: swap [`RpcRuntime`] for a
//! different implementation to target a different DCE/RPC-compatible
//! runtime, or use the in-process [`pipe`] transport for tests.

mod binding;
mod endpoint_map;
mod framing;
mod runtime;
mod status;

pub mod pipe;

pub use binding::{BindingHandle, ProtocolSequence, ReadWrite, SecurityContext, ServerBindings};
pub use endpoint_map::{register_endpoint, resolve_endpoint, EndpointMapError};
pub use framing::{decode_record_mark, stream_record_mark, update_record_mark};
pub use runtime::{RpcRuntime, WireRuntime};
pub use status::{AuthLevel, ImpersonationLevel, RpcStatus};

use std::fmt;

/// Errors raised by the wire layer itself (framing, I/O), as opposed to the
/// [`RpcStatus`] values a completed RPC attempt can return.
#[derive(Debug)]
pub enum Error {
    /// The peer sent something that doesn't parse as a valid frame.
    Protocol(ProtocolError),

    /// Underlying I/O failure.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[derive(Debug)]
pub enum ProtocolError {
    /// The record mark indicated a fragmented message; fragment reassembly
    /// is not implemented by this transport.
    MessageFragment,

    /// Generic decoding failure (short buffer, bad length, etc).
    Decode,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::MessageFragment => "received a fragmented message",
                Self::Decode => "error decoding frame",
            }
        )
    }
}
