// crates/integration-core/src/errors.rs
// ============================================================================
// Module: errors
// Description: Shared error taxonomy for the integration execution
//              framework (§7 error kinds) plus the canonical rendering
//              every crate's error type converts into.
// Dependencies: thiserror, uuid
// ============================================================================

use std::fmt;

use uuid::Uuid;

/// The fixed set of error kinds the framework classifies every failure
/// into, independent of which component raised it.
///
/// # Invariants
/// - `errorCode()` is stable and uppercase-snake, matching the wire
///   contract a remote log aggregator keys alerts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Declared configuration or start-state failed validation.
    ConfigValidation,
    /// The provider rejected credentials outright.
    ProviderAuthentication,
    /// The provider accepted credentials but denied the requested scope.
    ProviderAuthorization,
    /// Provider data failed integration-level validation rules.
    IntegrationValidation,
    /// A step's handler raised an error while collecting data.
    StepExecution,
    /// Canonicalization of raw provider data into an entity/relationship
    /// failed an invariant.
    Canonicalization,
    /// The synchronization API rejected a request.
    SynchronizationApi,
    /// Anything not classified above.
    Unexpected,
}

impl ErrorKind {
    /// The stable wire error code for this kind, e.g. `STEP_EXECUTION`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigValidation => "CONFIG_VALIDATION",
            Self::ProviderAuthentication => "PROVIDER_AUTHENTICATION",
            Self::ProviderAuthorization => "PROVIDER_AUTHORIZATION",
            Self::IntegrationValidation => "INTEGRATION_VALIDATION",
            Self::StepExecution => "STEP_EXECUTION",
            Self::Canonicalization => "CANONICALIZATION",
            Self::SynchronizationApi => "SYNCHRONIZATION_API",
            Self::Unexpected => "UNEXPECTED_ERROR",
        }
    }

    /// Whether this kind is considered "handled" — already logged with
    /// full detail at the point it was raised, so the top-level catch
    /// should not re-log it as a fresh unexpected error.
    #[must_use]
    pub const fn is_handled(self) -> bool {
        !matches!(self, Self::Unexpected)
    }
}

/// A framework-level error carrying the classification, a fresh
/// correlation id, a human-readable reason and optional extra context.
///
/// # Invariants
/// - `error_id` is assigned once, at construction, and never changes as
///   the error propagates up the call stack.
#[derive(Debug)]
pub struct FrameworkError {
    /// The error's classification.
    kind: ErrorKind,
    /// Correlation id assigned once at construction.
    error_id: Uuid,
    /// Human-readable reason for the failure.
    reason: String,
    /// Extra key/value context rendered alongside the base message.
    pub extra: Vec<(String, String)>,
}

impl FrameworkError {
    /// Builds a new error of the given kind with a fresh `errorId`.
    #[must_use]
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            error_id: Uuid::new_v4(),
            reason: reason.into(),
            extra: Vec::new(),
        }
    }

    /// Attaches an extra key/value pair to the error's rendering.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// The error's classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The correlation id assigned when this error was constructed.
    #[must_use]
    pub const fn error_id(&self) -> Uuid {
        self.error_id
    }

    /// The human-readable reason string.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for FrameworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "integration error (errorCode=\"{}\", errorId=\"{}\", reason=\"{}\"",
            self.kind.code(),
            self.error_id,
            self.reason
        )?;
        for (key, value) in &self.extra {
            write!(f, ", {key}=\"{value}\"")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for FrameworkError {}
