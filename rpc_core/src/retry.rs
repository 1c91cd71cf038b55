// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Pure classification of a completed call's status into a retry verdict,
//! grounded 1:1 on `rpc_impl_client.cpp`'s
//! `RpcErrRecommendedAction`/`GetRecommendation`/`CalcExponentialBackOff`.
//! Deliberately a pure function of status to make it unit-testable without
//! any runtime (spec section 9).

use rand::Rng;
use rpc_wire::RpcStatus;

use crate::config::RpcConfig;

/// What `RpcClient::wrap_with_retries` should do next given a completed
/// attempt's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Fixed-sleep retry, no back-off.
    SimpleRetry,
    /// Exponential back-off retry.
    RetryBackoff,
    /// Abandon the current binding and re-resolve before retrying.
    Reconnect,
    /// Stop; surface the status as-is.
    Quit,
}

pub struct RetryPolicy;

impl RetryPolicy {
    /// Classifies `status` per spec section 4.10's table.
    pub fn classify(status: RpcStatus) -> RetryVerdict {
        match status {
            RpcStatus::CallCancelled | RpcStatus::CallFailedDne => RetryVerdict::SimpleRetry,
            RpcStatus::ServerOutOfMemory | RpcStatus::ServerTooBusy => RetryVerdict::RetryBackoff,
            RpcStatus::CommFailure
            | RpcStatus::NotListening
            | RpcStatus::EndpointNotRegistered
            | RpcStatus::ServerUnavailable => RetryVerdict::Reconnect,
            _ => RetryVerdict::Quit,
        }
    }

    /// Back-off interval for attempt `n` with slot `slot_ms`, uniformly
    /// chosen in `[0, (2^n - 1) * slot_ms]`, capped at `max_ms`.
    pub fn backoff(attempt: u32, slot_ms: u64, max_ms: u64) -> std::time::Duration {
        let upper = (2u64.saturating_pow(attempt).saturating_sub(1)).saturating_mul(slot_ms).min(max_ms);
        let millis = if upper == 0 { 0 } else { rand::thread_rng().gen_range(0..=upper) };
        std::time::Duration::from_millis(millis)
    }

    /// Back-off bounded by `config`'s configured maximum.
    pub fn backoff_with_config(attempt: u32, config: &RpcConfig) -> std::time::Duration {
        Self::backoff(attempt, config.cli_call_retry_time_slot_ms, config.cli_call_retry_max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_class_is_never_misclassified_as_quit() {
        for status in [
            RpcStatus::CommFailure,
            RpcStatus::NotListening,
            RpcStatus::EndpointNotRegistered,
            RpcStatus::ServerUnavailable,
        ] {
            assert_eq!(RetryPolicy::classify(status), RetryVerdict::Reconnect);
        }
    }

    #[test]
    fn transient_resource_errors_get_backoff() {
        assert_eq!(RetryPolicy::classify(RpcStatus::ServerOutOfMemory), RetryVerdict::RetryBackoff);
        assert_eq!(RetryPolicy::classify(RpcStatus::ServerTooBusy), RetryVerdict::RetryBackoff);
    }

    #[test]
    fn cancelled_and_dne_get_simple_retry() {
        assert_eq!(RetryPolicy::classify(RpcStatus::CallCancelled), RetryVerdict::SimpleRetry);
        assert_eq!(RetryPolicy::classify(RpcStatus::CallFailedDne), RetryVerdict::SimpleRetry);
    }

    #[test]
    fn everything_else_quits() {
        assert_eq!(RetryPolicy::classify(RpcStatus::AccessDenied), RetryVerdict::Quit);
        assert_eq!(RetryPolicy::classify(RpcStatus::InvalidBinding), RetryVerdict::Quit);
        assert_eq!(RetryPolicy::classify(RpcStatus::Other(999)), RetryVerdict::Quit);
    }

    #[test]
    fn backoff_never_exceeds_the_theoretical_bound() {
        for attempt in 0..10 {
            let bound = (2u64.saturating_pow(attempt) - 1).saturating_mul(50);
            let got = RetryPolicy::backoff(attempt, 50, u64::MAX);
            assert!(got.as_millis() as u64 <= bound, "attempt {attempt}: {got:?} > {bound}ms");
        }
    }

    #[test]
    fn backoff_respects_the_configured_cap() {
        let got = RetryPolicy::backoff(20, 1000, 500);
        assert!(got.as_millis() as u64 <= 500);
    }
}
