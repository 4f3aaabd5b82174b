//! Crate-wide error taxonomy.
//!
//! Every fallible public operation in `aria_engine` returns `Result<T, AriaError>`.
//! `AriaError` is a plain enum with manual `Display`/`Error` impls (no `thiserror`),
//! matching the style of [`crate::cloudllm::tool_protocol::ToolError`]. A transport
//! adapter maps [`AriaError::kind`] to an HTTP status; this crate never depends on
//! HTTP types.

use std::fmt;

use uuid::Uuid;

/// Error kind taxonomy from the spec's error handling design. Distinct from the
/// concrete [`AriaError`] variants so a caller can match on "shape" without
/// unpacking every variant's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ConfigurationError,
    UpstreamUnavailable,
    UpstreamTimeout,
    UpstreamBadRequest,
    Cancelled,
    Internal,
}

/// The crate's single error type.
#[derive(Debug)]
pub enum AriaError {
    /// Bad input from a caller (empty content, oversized payload, malformed schedule, ...).
    Validation(String),
    /// The referenced entity does not exist.
    NotFound(String),
    /// Duplicate id on create, or a conflicting concurrent operation (`SessionBusy`).
    Conflict(String),
    /// Missing/disabled agent, missing model, bad catalog, or a budget violation caught at load.
    ConfigurationError(String),
    /// The upstream LLM proxy (or a skill's own dependency) is circuit-broken or refused.
    UpstreamUnavailable(String),
    /// The upstream call exceeded its deadline.
    UpstreamTimeout(String),
    /// The upstream rejected the request outright (4xx other than 429).
    UpstreamBadRequest(String),
    /// Cooperative cancellation fired; no status code is appropriate, the connection just closes.
    Cancelled,
    /// Anything else. Carries an incident id so the caller can correlate with server-side logs
    /// without leaking internals to the client.
    Internal { message: String, incident_id: Uuid },
}

impl AriaError {
    pub fn internal(message: impl Into<String>) -> Self {
        AriaError::Internal {
            message: message.into(),
            incident_id: Uuid::new_v4(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AriaError::Validation(_) => ErrorKind::Validation,
            AriaError::NotFound(_) => ErrorKind::NotFound,
            AriaError::Conflict(_) => ErrorKind::Conflict,
            AriaError::ConfigurationError(_) => ErrorKind::ConfigurationError,
            AriaError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            AriaError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            AriaError::UpstreamBadRequest(_) => ErrorKind::UpstreamBadRequest,
            AriaError::Cancelled => ErrorKind::Cancelled,
            AriaError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// The human-readable message a JSON error envelope would expose. Never includes a stack
    /// trace or the incident id's backing details (those stay in the log line).
    pub fn message(&self) -> String {
        match self {
            AriaError::Validation(m)
            | AriaError::NotFound(m)
            | AriaError::Conflict(m)
            | AriaError::ConfigurationError(m)
            | AriaError::UpstreamUnavailable(m)
            | AriaError::UpstreamTimeout(m)
            | AriaError::UpstreamBadRequest(m) => m.clone(),
            AriaError::Cancelled => "request cancelled".to_string(),
            AriaError::Internal { .. } => "internal error".to_string(),
        }
    }

    pub fn incident_id(&self) -> Option<Uuid> {
        match self {
            AriaError::Internal { incident_id, .. } => Some(*incident_id),
            _ => None,
        }
    }
}

impl fmt::Display for AriaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AriaError::Internal { message, incident_id } => {
                write!(f, "internal error [{}]: {}", incident_id, message)
            }
            other => write!(f, "{:?}: {}", other.kind(), other.message()),
        }
    }
}

impl std::error::Error for AriaError {}

impl From<sqlx::Error> for AriaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AriaError::NotFound("row not found".to_string()),
            other => AriaError::internal(format!("database error: {other}")),
        }
    }
}

pub type AriaResult<T> = Result<T, AriaError>;
