// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A flat read-only configuration bag, mirroring spec section 6's
//! collaborator contract. Parsing a config file or environment is the
//! configuration store's job (an explicit non-goal); this crate only
//! defines the fields it reads.

/// The knobs [`crate::client::RpcClient`]'s retry/reconnect loop consults,
/// grounded on `rpc_impl_client.cpp`'s
/// `core::AppConfig::GetSettings().framework.rpc.*` accesses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcConfig {
    /// Retry budget for `wrap_with_retries`'s inner loop.
    pub cli_call_max_retries: u32,
    /// Fixed sleep used by the `SimpleRetry` verdict.
    pub cli_call_retry_sleep_ms: u64,
    /// Back-off slot used by the `RetryBackoff` verdict.
    pub cli_call_retry_time_slot_ms: u64,
    /// Retry budget for `call`'s outer reconnect loop.
    pub cli_srv_connect_max_retries: u32,
    /// Sleep between reconnect attempts.
    pub cli_srv_conn_retry_sleep_secs: u64,
    /// Cap applied to the computed back-off interval, regardless of attempt
    /// count (spec section 4.10).
    pub cli_call_retry_max_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            cli_call_max_retries: 3,
            cli_call_retry_sleep_ms: 500,
            cli_call_retry_time_slot_ms: 100,
            cli_srv_connect_max_retries: 3,
            cli_srv_conn_retry_sleep_secs: 5,
            cli_call_retry_max_backoff_ms: 30_000,
        }
    }
}
