//! Error types and handlers for registry resolution and fetching

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coarse classification of a [`RegistryError`], used by callers to decide
/// whether an operation is worth retrying later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Config,
    Auth,
    NotFound,
    Transient,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed reference or digest string
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration or candidate definition
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport-level failure before any HTTP status was received
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected after the single permitted refresh
    #[error("Authentication rejected by {host} (status {status})")]
    Auth { host: String, status: u16 },

    /// The credential collaborator could not produce a header
    #[error("Credential lookup failed for {host}: {message}")]
    Credential { host: String, message: String },

    #[error("Not found: {what} at {host}")]
    NotFound { host: String, what: String },

    /// Server error, unexpected status or connection failure at one host
    #[error("Registry error at {host}: {message}")]
    Transient {
        host: String,
        status: Option<u16>,
        message: String,
    },

    /// Every candidate failed; carries the last concrete cause
    #[error("All {attempted} registry host(s) failed, last tried {last_host}: {source}")]
    Exhausted {
        last_host: String,
        attempted: usize,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("Fetch cancelled{}", contacting(.host))]
    Cancelled { host: Option<String> },
}

fn contacting(host: &Option<String>) -> String {
    host.as_ref()
        .map(|h| format!(" while contacting {}", h))
        .unwrap_or_default()
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Parse(_) => ErrorKind::Parse,
            RegistryError::Validation(_) => ErrorKind::Config,
            RegistryError::Auth { .. } | RegistryError::Credential { .. } => ErrorKind::Auth,
            RegistryError::NotFound { .. } => ErrorKind::NotFound,
            RegistryError::Network(_) | RegistryError::Transient { .. } => ErrorKind::Transient,
            RegistryError::Exhausted { .. } => ErrorKind::Exhausted,
            RegistryError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Host of the candidate that produced this error, if any
    pub fn last_host(&self) -> Option<&str> {
        match self {
            RegistryError::Auth { host, .. }
            | RegistryError::Credential { host, .. }
            | RegistryError::NotFound { host, .. }
            | RegistryError::Transient { host, .. } => Some(host),
            RegistryError::Exhausted { last_host, .. } => Some(last_host),
            RegistryError::Cancelled { host } => host.as_deref(),
            _ => None,
        }
    }

    /// Last HTTP status observed, looking through `Exhausted`
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Auth { status, .. } => Some(*status),
            RegistryError::NotFound { .. } => Some(404),
            RegistryError::Transient { status, .. } => *status,
            RegistryError::Exhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Exhausted and transient failures may succeed after a configuration
    /// change or a later attempt; they must still be reported.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Exhausted | ErrorKind::Transient)
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}
