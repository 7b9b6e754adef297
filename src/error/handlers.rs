//! Standardized classification of registry HTTP responses and network errors

use crate::error::RegistryError;
use reqwest::StatusCode;
use serde::Deserialize;

/// How the fetch coordinator should treat a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 401/403: refresh credentials once, then move on
    Unauthorized,
    /// 404: content is absent here but may exist at another host
    NotFound,
    /// 5xx, 429 and any other unexpected status
    Retryable,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => StatusClass::Success,
            401 | 403 => StatusClass::Unauthorized,
            404 => StatusClass::NotFound,
            _ => StatusClass::Retryable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OciErrorBody {
    #[serde(default)]
    errors: Vec<OciErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct OciErrorEntry {
    code: String,
    #[serde(default)]
    message: String,
}

/// Standard error handler for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Render a diagnostic message for a failed status, using the registry's
    /// error body when it follows the distribution error format.
    pub fn describe_status(status: StatusCode, body: &str, operation: &str) -> String {
        let detail = Self::parse_error_body(body).unwrap_or_else(|| body.trim().to_string());
        let summary = match status.as_u16() {
            429 => format!("Rate limited during {}", operation),
            500 => format!("Registry server error during {}", operation),
            502 | 503 => format!("Registry unavailable for {}", operation),
            504 => format!("Registry gateway timeout during {}", operation),
            _ => format!("{} failed (status {})", operation, status),
        };

        if detail.is_empty() {
            summary
        } else {
            format!("{}: {}", summary, detail)
        }
    }

    /// Extract `CODE: message` pairs from an OCI/Docker error body
    pub fn parse_error_body(body: &str) -> Option<String> {
        let parsed: OciErrorBody = serde_json::from_str(body).ok()?;
        if parsed.errors.is_empty() {
            return None;
        }
        Some(
            parsed
                .errors
                .iter()
                .map(|e| {
                    if e.message.is_empty() {
                        e.code.clone()
                    } else {
                        format!("{}: {}", e.code, e.message)
                    }
                })
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> RegistryError {
        if error.is_timeout() {
            RegistryError::Network(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            RegistryError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            RegistryError::Network(format!("TLS certificate error during {}: {}", context, error))
        } else {
            RegistryError::Network(format!("{} network error: {}", context, error))
        }
    }
}
