//! Registry host candidates
//!
//! A candidate is one endpoint (mirror or origin) that may serve content for a
//! reference. Candidates arrive from an external host resolver in priority order.

use crate::error::{RegistryError, Result};
use crate::reference::ImageReference;
use crate::registry::auth::{Anonymous, CredentialProvider};
use reqwest::header::{HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_API_PATH_PREFIX: &str = "/v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(RegistryError::Validation(format!(
                "Unsupported registry scheme: {}",
                other
            ))),
        }
    }

    /// Scheme used to reach an origin registry when nothing is configured:
    /// plain HTTP for loopback hosts, HTTPS everywhere else.
    pub fn infer_for_host(host: &str) -> Self {
        let name = if host.starts_with('[') {
            host.split(']').next().unwrap_or(host).trim_start_matches('[')
        } else {
            host.rsplit_once(':').map(|(name, _)| name).unwrap_or(host)
        };

        match name {
            "localhost" | "127.0.0.1" | "::1" => Scheme::Http,
            _ => Scheme::Https,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry endpoint considered during a fetch
#[derive(Clone)]
pub struct RegistryHostCandidate {
    scheme: Scheme,
    host: String,
    api_path_prefix: Option<String>,
    headers: BTreeMap<String, String>,
    credentials: Arc<dyn CredentialProvider>,
}

impl RegistryHostCandidate {
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        if host.is_empty() || host.contains('/') || host.contains("://") {
            return Err(RegistryError::Validation(format!(
                "Registry host must be a bare host[:port], got '{}'",
                host
            )));
        }

        Ok(Self {
            scheme,
            host,
            api_path_prefix: None,
            headers: BTreeMap::new(),
            credentials: Arc::new(Anonymous),
        })
    }

    /// Implicit candidate for the reference's own registry
    pub fn origin(reference: &ImageReference) -> Self {
        Self {
            scheme: Scheme::infer_for_host(reference.host()),
            host: reference.host().to_string(),
            api_path_prefix: None,
            headers: BTreeMap::new(),
            credentials: Arc::new(Anonymous),
        }
    }

    /// Set an explicit API path prefix such as `/custom/v2`.
    ///
    /// The prefix is normalised to one leading slash and no trailing slash; an
    /// empty prefix is rejected.
    pub fn with_api_path_prefix(mut self, prefix: &str) -> Result<Self> {
        let trimmed = prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(RegistryError::Validation(format!(
                "API path prefix for {} must not be empty",
                self.host
            )));
        }
        let normalized = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        self.api_path_prefix = Some(normalized);
        Ok(self)
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Add a header sent with every request to this candidate
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let (name, value) = (name.into(), value.into());
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            RegistryError::Validation(format!("Invalid header name '{}' for {}: {}", name, self.host, e))
        })?;
        HeaderValue::from_str(&value).map_err(|e| {
            RegistryError::Validation(format!("Invalid value for header {} on {}: {}", name, self.host, e))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api_path_prefix(&self) -> &str {
        self.api_path_prefix.as_deref().unwrap_or(DEFAULT_API_PATH_PREFIX)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }
}

impl fmt::Debug for RegistryHostCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHostCandidate")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("api_path_prefix", &self.api_path_prefix())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Ordered candidates; index 0 is the most preferred
#[derive(Debug, Clone, Default)]
pub struct CandidateList(Vec<RegistryHostCandidate>);

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: RegistryHostCandidate) {
        self.0.push(candidate);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RegistryHostCandidate> {
        self.0.iter()
    }

    /// Append the origin registry as the last resort unless a candidate
    /// already targets the same host.
    pub fn with_origin(mut self, reference: &ImageReference) -> Self {
        if !self.0.iter().any(|c| c.host() == reference.host()) {
            self.0.push(RegistryHostCandidate::origin(reference));
        }
        self
    }

    /// The candidates to try for `reference`: the list as given, or the
    /// single implicit origin candidate when the list is empty.
    pub fn effective(&self, reference: &ImageReference) -> Vec<RegistryHostCandidate> {
        if self.0.is_empty() {
            vec![RegistryHostCandidate::origin(reference)]
        } else {
            self.0.clone()
        }
    }
}

impl From<Vec<RegistryHostCandidate>> for CandidateList {
    fn from(candidates: Vec<RegistryHostCandidate>) -> Self {
        Self(candidates)
    }
}

impl FromIterator<RegistryHostCandidate> for CandidateList {
    fn from_iter<T: IntoIterator<Item = RegistryHostCandidate>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a RegistryHostCandidate;
    type IntoIter = std::slice::Iter<'a, RegistryHostCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
