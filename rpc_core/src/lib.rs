// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A transport-agnostic wrapper around a DCE/RPC-style client and server:
//! binding composition, Windows-SSP/Schannel security negotiation,
//! impersonation scopes, a server lifecycle state machine, and a client
//! retry/reconnect engine. Built on top of [`rpc_wire`]'s framing,
//! listener and [`rpc_wire::RpcRuntime`] seam.

pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod security;
pub mod server;
pub mod types;

pub use client::RpcClient;
pub use config::RpcConfig;
pub use error::{ErrorKind, Logger, RpcError};
pub use retry::{RetryPolicy, RetryVerdict};
pub use server::{ImpersonationScope, RpcServer, ServerSecurity};
pub use types::{AuthenticationSecurity, CertInfo, ImpersonationLevel, RpcSrvObject, ServerState, StoreLocation};
