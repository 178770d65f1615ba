//! Error taxonomy for the fetch pipeline.
//!
//! # Kinds
//! - Fatal: 4xx other than 408/429, malformed requests, decode failures
//! - Transient: listed status codes, listed error codes, known transient messages
//! - Circuit-open: raised without touching the network
//! - Deadline-exceeded: raised by the deadline guard
//!
//! # Design Decisions
//! - `Clone` so coalesced callers observe the identical failure
//! - Carries plain data (status, errno-style code, message) instead of the
//!   underlying client error, which is neither `Clone` nor stable to match on

use thiserror::Error;

/// Errors surfaced by every layer of the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The origin answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// The request never produced a response.
    #[error("network error{}: {message}", code_suffix(.code))]
    Network {
        code: Option<String>,
        message: String,
    },

    /// The endpoint's circuit breaker is open.
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },

    /// The overall budget for a call ran out.
    #[error("operation '{label}' timed out after {timeout_ms}ms")]
    DeadlineExceeded { label: String, timeout_ms: u64 },

    /// A component was shut down before or while the request waited.
    #[error("{component} shutting down")]
    ShuttingDown { component: &'static str },

    /// The response body could not be decoded as the requested type.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The request could not be built (bad URL, bad method, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A detached task died before reporting (panic or runtime shutdown).
    #[error("internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Errno-style code carried by the error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            FetchError::Network { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FetchError::CircuitOpen { .. })
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, FetchError::DeadlineExceeded { .. })
    }

    /// Short stable name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Http { .. } => "http",
            FetchError::Network { .. } => "network",
            FetchError::CircuitOpen { .. } => "circuit_open",
            FetchError::DeadlineExceeded { .. } => "deadline_exceeded",
            FetchError::ShuttingDown { .. } => "shutting_down",
            FetchError::Decode { .. } => "decode",
            FetchError::InvalidRequest(_) => "invalid_request",
            FetchError::Internal(_) => "internal",
        }
    }

    /// Build a network error from a reqwest failure, mapping it onto the
    /// errno-style codes the retry policy understands.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        FetchError::Network {
            code: network_code(err).map(str::to_string),
            message: err.to_string(),
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

fn network_code(err: &reqwest::Error) -> Option<&'static str> {
    if err.is_timeout() {
        return Some("ETIMEDOUT");
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    return Some("ECONNRESET")
                }
                std::io::ErrorKind::ConnectionRefused => return Some("ECONNREFUSED"),
                std::io::ErrorKind::TimedOut => return Some("ETIMEDOUT"),
                _ => {}
            }
        }
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return Some("ENOTFOUND");
        }
        source = inner.source();
    }

    if err.is_connect() {
        Some("ECONNREFUSED")
    } else {
        None
    }
}
