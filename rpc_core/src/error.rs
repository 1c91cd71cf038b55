// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Error taxonomy: translates a numeric [`rpc_wire::RpcStatus`] into a rich
//! error record, grounded on `rpc_impl_util.cpp`'s status-to-message
//! formatting and on the extended-error-chain loop used throughout
//! `rpc_impl_client.cpp`/`rpc_impl_server.cpp` (`GetErrorExtendedInfo`).
//!
//! Kept as a sum type rather than an exception hierarchy, per the Design
//! Note that the error-kind taxonomy should route on a tag, not a class
//! tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use rpc_wire::RpcStatus;

/// Routing tag for an [`RpcError`]; distinct from its source (there is only
/// one source type, `RpcError` itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested combination of options is impossible (e.g. mutual authn
    /// asked for but the directory service is unavailable).
    ConfigurationError,
    /// Credential/store/certificate problem.
    SecurityError,
    /// Binding string composition/parse/reset failure.
    BindingError,
    /// Interface or endpoint-map registration failure.
    RegistrationError,
    /// Recoverable call-time failure (server busy, OOM, cancelled).
    RuntimeTransient,
    /// Server unreachable or endpoint gone.
    ConnectionLost,
    /// A `UuidVector` grew past its 32-entry capacity.
    CapacityExceeded,
    /// Unrecoverable/unexpected (runtime structured exception, memory
    /// violation).
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::SecurityError => "SecurityError",
            ErrorKind::BindingError => "BindingError",
            ErrorKind::RegistrationError => "RegistrationError",
            ErrorKind::RuntimeTransient => "RuntimeTransient",
            ErrorKind::ConnectionLost => "ConnectionLost",
            ErrorKind::CapacityExceeded => "CapacityExceeded",
            ErrorKind::Fatal => "Fatal",
        };
        write!(f, "{label}")
    }
}

/// Maps a completed call's status to the error kind that should be raised
/// if the call is not retried further, per spec section 7's trigger table.
pub fn kind_for(status: RpcStatus) -> ErrorKind {
    match status {
        RpcStatus::Ok => unreachable!("kind_for should not be called on a successful status"),
        RpcStatus::CallCancelled | RpcStatus::CallFailedDne => ErrorKind::RuntimeTransient,
        RpcStatus::ServerOutOfMemory | RpcStatus::ServerTooBusy => ErrorKind::RuntimeTransient,
        RpcStatus::CommFailure
        | RpcStatus::NotListening
        | RpcStatus::EndpointNotRegistered
        | RpcStatus::ServerUnavailable => ErrorKind::ConnectionLost,
        RpcStatus::AccessDenied => ErrorKind::SecurityError,
        RpcStatus::InvalidBinding => ErrorKind::BindingError,
        RpcStatus::RegistrationFailed => ErrorKind::RegistrationError,
        RpcStatus::Fatal | RpcStatus::Other(_) => ErrorKind::Fatal,
    }
}

fn status_messages() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("RPC_S_OK", "the call completed successfully");
        m.insert("RPC_S_CALL_CANCELLED", "the call was cancelled");
        m.insert("RPC_S_CALL_FAILED_DNE", "the callee does not exist yet");
        m.insert("RPC_S_SERVER_OUT_OF_MEMORY", "the server is out of memory");
        m.insert("RPC_S_SERVER_TOO_BUSY", "the server is too busy to service the call");
        m.insert("RPC_S_COMM_FAILURE", "a communication failure occurred");
        m.insert("RPC_S_NOT_LISTENING", "the server exists but is not listening");
        m.insert("EPT_S_NOT_REGISTERED", "no endpoint is registered for this interface");
        m.insert("RPC_S_SERVER_UNAVAILABLE", "the server is unreachable");
        m.insert("RPC_S_ACCESS_DENIED", "access was denied");
        m.insert("RPC_S_INVALID_BINDING", "the binding handle is invalid");
        m.insert("RPC_S_ALREADY_REGISTERED", "registration failed");
        m.insert("RPC_S_FATAL", "an unrecoverable failure occurred");
        m.insert("RPC_S_UNKNOWN", "an unclassified runtime status was returned");
        m
    })
}

fn textual_message(status: RpcStatus) -> &'static str {
    status_messages().get(status.label()).copied().unwrap_or("no further details available")
}

/// One of the runtime's per-thread extended-error entries: component index,
/// detection-location code, host name, PID, timestamp, and one typed
/// parameter (spec section 4.1).
#[derive(Debug, Clone)]
pub struct ExtendedErrorEntry {
    pub component_index: u32,
    pub detection_location: u32,
    pub host_name: String,
    pub pid: u32,
    pub timestamp: std::time::SystemTime,
    pub param: ExtendedParam,
}

/// A single extended-error parameter, preserving its underlying type.
/// Truncated or binary parameters are represented by `Skipped` rather than
/// guessed at.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendedParam {
    Signed(i64),
    Unsigned(u64),
    Pointer(usize),
    Utf8(String),
    Ucs2(String),
    Skipped,
}

/// A source of extended-error entries, standing in for "the runtime's
/// per-thread error chain" (spec section 4.1). Each call returns the next
/// entry, a transient failure reading the chain (without losing what's
/// already been collected), or `None` once the chain is exhausted.
pub trait ExtendedInfoSource {
    fn next_entry(&mut self) -> Option<Result<ExtendedErrorEntry, String>>;
}

/// A rich description of a non-success status: primary message, optional
/// detail, and whatever extended-error entries were available.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub primary_message: String,
    pub detail: Option<String>,
    pub extended: Vec<ExtendedErrorEntry>,
    /// Set when enumerating the extended chain failed partway through; the
    /// original status is never masked by this.
    pub extended_chain_note: Option<String>,
}

impl ErrorRecord {
    fn new(status: RpcStatus, tag: &str, detail: Option<&str>) -> Self {
        Self {
            primary_message: format!("{tag} returned {}: {}", status.label(), textual_message(status)),
            detail: detail.map(str::to_owned),
            extended: Vec::new(),
            extended_chain_note: None,
        }
    }

    /// Drains `source` into `self.extended`, recording (without discarding
    /// already-collected entries) a note if the chain itself fails partway
    /// through.
    pub fn collect_extended(&mut self, source: &mut dyn ExtendedInfoSource) {
        loop {
            match source.next_entry() {
                Some(Ok(entry)) => self.extended.push(entry),
                Some(Err(message)) => {
                    self.extended_chain_note = Some(message);
                    break;
                }
                None => break,
            }
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary_message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        for entry in &self.extended {
            write!(
                f,
                "; extended: component {} at location {} on {} (pid {})",
                entry.component_index, entry.detection_location, entry.host_name, entry.pid
            )?;
        }
        if let Some(note) = &self.extended_chain_note {
            write!(f, "; (failed to read full extended chain: {note})")?;
        }
        Ok(())
    }
}

/// The error type raised by `rpc_core` components. Carries a routing
/// [`ErrorKind`] plus the descriptive [`ErrorRecord`].
#[derive(Debug, Clone)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub record: ErrorRecord,
}

impl RpcError {
    pub fn new(kind: ErrorKind, record: ErrorRecord) -> Self {
        Self { kind, record }
    }

    /// Builds a `ConfigurationError` directly, without a runtime status
    /// (used by the security negotiator and the client/server
    /// constructors for options validated before any call is made).
    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ConfigurationError,
            record: ErrorRecord {
                primary_message: message.into(),
                detail: None,
                extended: Vec::new(),
                extended_chain_note: None,
            },
        }
    }

    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::CapacityExceeded,
            record: ErrorRecord {
                primary_message: message.into(),
                detail: None,
                extended: Vec::new(),
                extended_chain_note: None,
            },
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.record)
    }
}

impl std::error::Error for RpcError {}

/// Priorities a [`Logger`] accepts, mirroring spec section 6's collaborator
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPriority {
    Fatal,
    Critical,
    Error,
    Warning,
    Notice,
    Information,
    Debug,
    Trace,
}

/// The logging collaborator: `rpc_core` never calls a global logging macro
/// directly (see the Design Note on untangling macro coupling), it takes
/// `&dyn Logger` instead.
pub trait Logger: Send + Sync {
    fn write(&self, message: &str, priority: LogPriority, details: Option<&str>, with_stack_trace: bool);
}

/// Default [`Logger`] forwarding to the `log` facade, the way the teacher
/// crate logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl Logger for LogCrateLogger {
    fn write(&self, message: &str, priority: LogPriority, details: Option<&str>, with_stack_trace: bool) {
        let level = match priority {
            LogPriority::Fatal | LogPriority::Critical | LogPriority::Error => log::Level::Error,
            LogPriority::Warning => log::Level::Warn,
            LogPriority::Notice | LogPriority::Information => log::Level::Info,
            LogPriority::Debug => log::Level::Debug,
            LogPriority::Trace => log::Level::Trace,
        };

        match details {
            Some(details) => log::log!(level, "{message}: {details}"),
            None => log::log!(level, "{message}"),
        }

        if with_stack_trace {
            log::log!(level, "(stack trace omitted: call-stack tracing is an external collaborator)");
        }
    }
}

/// `describe(status) -> ErrorRecord`, spec section 4.1: a no-op is not
/// defined for `Ok` — callers check `status.is_ok()` first (see
/// [`throw_if`]/[`log_if`]).
pub fn describe(status: RpcStatus, tag: &str, details: Option<&str>) -> ErrorRecord {
    ErrorRecord::new(status, tag, details)
}

/// No-op on success; otherwise builds an [`RpcError`] of the kind matching
/// `status`'s classification.
pub fn throw_if(status: RpcStatus, tag: &str, details: Option<&str>) -> Result<(), RpcError> {
    if status.is_ok() {
        return Ok(());
    }

    Err(RpcError::new(kind_for(status), describe(status, tag, details)))
}

/// No-op on success; otherwise emits the same record through `logger`.
pub fn log_if(status: RpcStatus, tag: &str, priority: LogPriority, logger: &dyn Logger) {
    if status.is_ok() {
        return;
    }

    let record = describe(status, tag, None);
    logger.write(&record.primary_message, priority, record.detail.as_deref(), false);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyChain {
        remaining: Vec<Result<ExtendedErrorEntry, String>>,
    }

    impl ExtendedInfoSource for FlakyChain {
        fn next_entry(&mut self) -> Option<Result<ExtendedErrorEntry, String>> {
            if self.remaining.is_empty() {
                None
            } else {
                Some(self.remaining.remove(0))
            }
        }
    }

    fn sample_entry(component_index: u32) -> ExtendedErrorEntry {
        ExtendedErrorEntry {
            component_index,
            detection_location: 42,
            host_name: "host".into(),
            pid: 1,
            timestamp: std::time::SystemTime::UNIX_EPOCH,
            param: ExtendedParam::Unsigned(7),
        }
    }

    #[test]
    fn throw_if_is_a_no_op_on_success() {
        assert!(throw_if(RpcStatus::Ok, "tag", None).is_ok());
    }

    #[test]
    fn throw_if_classifies_reconnect_class_as_connection_lost() {
        let err = throw_if(RpcStatus::CommFailure, "Call", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionLost);
        assert!(err.record.primary_message.contains("Call returned RPC_S_COMM_FAILURE"));
    }

    #[test]
    fn extended_chain_failure_does_not_mask_the_original_status() {
        let mut record = describe(RpcStatus::ServerTooBusy, "Call", None);
        let mut source = FlakyChain {
            remaining: vec![Ok(sample_entry(1)), Err("chain read failed".into())],
        };

        record.collect_extended(&mut source);

        assert_eq!(record.extended.len(), 1);
        assert_eq!(record.extended_chain_note.as_deref(), Some("chain read failed"));
        assert!(record.primary_message.contains("RPC_S_SERVER_TOO_BUSY"));
    }

    #[test]
    fn log_if_is_a_no_op_on_success() {
        struct PanicsOnWrite;
        impl Logger for PanicsOnWrite {
            fn write(&self, _: &str, _: LogPriority, _: Option<&str>, _: bool) {
                panic!("should not be called");
            }
        }

        log_if(RpcStatus::Ok, "tag", LogPriority::Error, &PanicsOnWrite);
    }
}
