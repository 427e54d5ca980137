// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Shared value types and error taxonomy used across the everest runtime
//! crates.
//!
//! [`Value`] and [`Arguments`] are the dynamically-typed payload types that
//! flow across every topic boundary; [`Fulfillment`] binds a requirement to
//! a concrete provider. [`EvError`] is the umbrella error type each crate's
//! own error enum converts into via `#[from]`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically typed JSON value: the payload type for variables, command
/// arguments, and command results.
///
/// This is `serde_json::Value` by another name — null, boolean, integer or
/// float (`serde_json` does not distinguish the two at the type level),
/// string, ordered array, or string-keyed ordered mapping.
pub type Value = serde_json::Value;

/// A string-keyed mapping from parameter name to [`Value`].
pub type Arguments = serde_json::Map<String, Value>;

/// A `(module_id, implementation_id)` pair identifying a concrete provider
/// of a required interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fulfillment {
    pub module_id: String,
    pub implementation_id: String,
}

impl Fulfillment {
    #[must_use]
    pub fn new(module_id: impl Into<String>, implementation_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            implementation_id: implementation_id.into(),
        }
    }
}

impl fmt::Display for Fulfillment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.implementation_id.is_empty() {
            write!(f, "{}", self.module_id)
        } else {
            write!(f, "{}/{}", self.module_id, self.implementation_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Machine-readable error code, of the form `EV-<CATEGORY>-<NNN>`.
///
/// Categories follow §7 of the runtime specification:
///
/// - **SCHEMA** — schema/parse errors
/// - **TOPOLOGY** — self-fulfillment, missing target, interface mismatch,
///   cardinality violation, hash mismatch
/// - **PROTOCOL** — malformed wire messages, unknown call ids, double-implement
/// - **TIMEOUT** — `call_command` deadline exceeded
/// - **STATE** — bootstrap state machine / disposer contract violations
/// - **TRANSPORT** — broker connection or publish failures
/// - **FATAL** — unrecoverable at process start (embedded schema compile failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SchemaInvalidPayload,
    SchemaMissingDefault,
    SchemaCompileFailed,
    TopologySelfFulfillment,
    TopologyMissingTarget,
    TopologyInterfaceMismatch,
    TopologyCardinality,
    TopologyHashMismatch,
    ProtocolMalformedPayload,
    ProtocolUnknownCallId,
    ProtocolDoubleImplement,
    ProtocolInvalidTopic,
    Timeout,
    StateViolation,
    TransportFailure,
    Fatal,
}

impl ErrorCode {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaInvalidPayload => "EV-SCHEMA-001",
            Self::SchemaMissingDefault => "EV-SCHEMA-002",
            Self::SchemaCompileFailed => "EV-SCHEMA-003",
            Self::TopologySelfFulfillment => "EV-TOPOLOGY-001",
            Self::TopologyMissingTarget => "EV-TOPOLOGY-002",
            Self::TopologyInterfaceMismatch => "EV-TOPOLOGY-003",
            Self::TopologyCardinality => "EV-TOPOLOGY-004",
            Self::TopologyHashMismatch => "EV-TOPOLOGY-005",
            Self::ProtocolMalformedPayload => "EV-PROTOCOL-001",
            Self::ProtocolUnknownCallId => "EV-PROTOCOL-002",
            Self::ProtocolDoubleImplement => "EV-PROTOCOL-003",
            Self::ProtocolInvalidTopic => "EV-PROTOCOL-004",
            Self::Timeout => "EV-TIMEOUT-001",
            Self::StateViolation => "EV-STATE-001",
            Self::TransportFailure => "EV-TRANSPORT-001",
            Self::Fatal => "EV-FATAL-001",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Shared error catalog. Crate-local error enums convert into this via
/// `#[from]` at their public boundary, or wrap it directly.
#[derive(Debug, thiserror::Error)]
pub enum EvError {
    #[error("[{code}] schema validation failed at {pointer}: {message}")]
    SchemaValidation {
        code: ErrorCode,
        pointer: String,
        message: String,
    },

    #[error("[{code}] {message}")]
    Topology { code: ErrorCode, message: String },

    #[error("[{code}] {message}")]
    Protocol { code: ErrorCode, message: String },

    #[error("[{}] call timed out after {elapsed_ms}ms", ErrorCode::Timeout)]
    Timeout { elapsed_ms: u64 },

    #[error("[{}] invalid state transition: {message}", ErrorCode::StateViolation)]
    State { message: String },

    #[error("[{}] transport failure: {message}", ErrorCode::TransportFailure)]
    Transport { message: String },

    #[error("[{}] {message}", ErrorCode::Fatal)]
    Fatal { message: String },
}

impl EvError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SchemaValidation { code, .. }
            | Self::Topology { code, .. }
            | Self::Protocol { code, .. } => *code,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::State { .. } => ErrorCode::StateViolation,
            Self::Transport { .. } => ErrorCode::TransportFailure,
            Self::Fatal { .. } => ErrorCode::Fatal,
        }
    }

    #[must_use]
    pub fn topology(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Topology {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the runtime crates.
pub type EvResult<T> = Result<T, EvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfillment_display_omits_empty_impl() {
        let f = Fulfillment::new("mod_a", "");
        assert_eq!(f.to_string(), "mod_a");
        let f2 = Fulfillment::new("mod_a", "main");
        assert_eq!(f2.to_string(), "mod_a/main");
    }

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(ErrorCode::TopologySelfFulfillment.code(), "EV-TOPOLOGY-001");
        assert_eq!(ErrorCode::Timeout.code(), "EV-TIMEOUT-001");
    }

    #[test]
    fn ev_error_code_roundtrips_through_variant() {
        let err = EvError::topology(ErrorCode::TopologyCardinality, "too few fulfillments");
        assert_eq!(err.code(), ErrorCode::TopologyCardinality);
    }
}
