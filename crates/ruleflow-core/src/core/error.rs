// ruleflow-core/src/core/error.rs
// ============================================================================
// Module: Ruleflow Engine Errors
// Description: Caller-facing error kinds with stable codes and status hints.
// Purpose: Give transports a uniform error surface without HTTP coupling.
// Dependencies: crate::core::rule, thiserror
// ============================================================================

//! ## Overview
//! Engine operations fail with one of six kinds. Each kind carries a stable
//! code and a status hint that transports map onto their own error surface.
//! Validation and conflict failures leave engine state untouched; internal
//! errors indicate invariant violations and are always logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::rule::RuleSpecError;
use crate::interfaces::StorageError;

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Caller-facing engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced rule, fact, timer, or version does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A rule document or request was malformed.
    #[error("validation failure: {0}")]
    Validation(String),
    /// A duplicate rule id or concurrent version update.
    #[error("conflict: {0}")]
    Conflict(String),
    /// An unknown operator, unparseable regex, or malformed operand.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// A transient storage failure or shutdown in progress.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// An engine invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns the HTTP-ish status hint transports map onto their surface.
    #[must_use]
    pub const fn status_hint(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) | Self::BadRequest(_) => 400,
            Self::Conflict(_) => 409,
            Self::ServiceUnavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }
}

impl From<RuleSpecError> for EngineError {
    fn from(error: RuleSpecError) -> Self {
        match &error {
            RuleSpecError::InvalidRegex { .. } => Self::BadRequest(error.to_string()),
            _ => Self::Validation(error.to_string()),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(error: StorageError) -> Self {
        Self::ServiceUnavailable(error.to_string())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
