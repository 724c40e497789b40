//! Tracker error types
//!
//! Failures are classified at the transport boundary: transient failures
//! (network, 429, 5xx) are retried and only surface as
//! [`TrackerError::RetriesExhausted`]; permanent failures surface on the
//! first attempt with the request context attached.

use thiserror::Error;

/// Result type alias for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Maximum number of response-body characters kept in an error.
pub const BODY_EXCERPT_CHARS: usize = 500;

/// How a failed attempt should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network error, 429 or 5xx: back off and try again.
    Transient,
    /// Any other 4xx or an undecodable body: give up immediately.
    Permanent,
}

impl FailureClass {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        if status == 429 || status >= 500 {
            Self::Transient
        } else {
            Self::Permanent
        }
    }
}

/// Errors raised by the transport and the work-item repository.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Transient failures persisted past the retry budget
    #[error(
        "{method} {url} failed after {attempts} attempts (last status {}): {body}",
        display_status(.status)
    )]
    RetriesExhausted {
        method: String,
        url: String,
        attempts: u32,
        status: Option<u16>,
        body: String,
    },

    /// The service refused the request (4xx other than 429)
    #[error("{method} {url} rejected with {status} {reason}: {body}")]
    Rejected {
        method: String,
        url: String,
        status: u16,
        reason: String,
        body: String,
    },

    /// A 2xx response whose body could not be decoded
    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    /// A patch document failed validation before being sent
    #[error("Invalid patch document: {message}")]
    InvalidPatch { message: String },

    /// Missing organization, project or credential
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    /// Create a retries-exhausted error
    pub fn retries_exhausted(
        method: impl Into<String>,
        url: impl Into<String>,
        attempts: u32,
        status: Option<u16>,
        body: &str,
    ) -> Self {
        Self::RetriesExhausted {
            method: method.into(),
            url: url.into(),
            attempts,
            status,
            body: excerpt(body),
        }
    }

    /// Create a rejected-request error
    pub fn rejected(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        reason: impl Into<String>,
        body: &str,
    ) -> Self {
        Self::Rejected {
            method: method.into(),
            url: url.into(),
            status,
            reason: reason.into(),
            body: excerpt(body),
        }
    }

    /// Create a malformed-response error
    pub fn malformed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-patch error
    pub fn invalid_patch(message: impl Into<String>) -> Self {
        Self::InvalidPatch {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { status, .. } => *status,
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for a 404 from the service. Lookups map this to an empty result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }

    /// True for a 409 Conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }

    /// Whether the failure that produced this error was transient in nature.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

fn display_status(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Truncate a response body for diagnostics.
pub fn excerpt(body: &str) -> String {
    if body.chars().count() <= BODY_EXCERPT_CHARS {
        body.to_string()
    } else {
        body.chars().take(BODY_EXCERPT_CHARS).collect()
    }
}
