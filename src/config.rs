//! Configuration for the transport and the static mirror list

use crate::error::{RegistryError, Result};
use crate::reference::ImageReference;
use crate::registry::host::{CandidateList, RegistryHostCandidate, Scheme};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP client settings shared by every fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub skip_tls: bool,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            connect_timeout_secs: 30,
            skip_tls: false,
            user_agent: concat!("remote-resolver/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(RegistryError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.timeout_secs > 86400 {
            return Err(RegistryError::Validation(
                "Timeout cannot exceed 24 hours (86400 seconds)".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(RegistryError::Validation(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A mirror endpoint, e.g. `http://mirror.local:5000` or
/// `https://mirror.example.com/custom/v2`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub endpoint: String,
    /// Overrides any path carried by `endpoint`
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl MirrorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            path_prefix: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn to_candidate(&self) -> Result<RegistryHostCandidate> {
        let endpoint = if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let host = self.endpoint.split('/').next().unwrap_or_default();
            format!("{}://{}", Scheme::infer_for_host(host), self.endpoint)
        };
        let url = url::Url::parse(&endpoint)?;

        let scheme = Scheme::parse(url.scheme())?;
        let host = url
            .host_str()
            .ok_or_else(|| RegistryError::Validation(format!("Mirror endpoint has no host: {}", self.endpoint)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut candidate = RegistryHostCandidate::new(scheme, host)?;

        let url_path = url.path().trim_end_matches('/');
        match &self.path_prefix {
            Some(prefix) => candidate = candidate.with_api_path_prefix(prefix)?,
            None if !url_path.is_empty() => candidate = candidate.with_api_path_prefix(url_path)?,
            None => {}
        }

        for (name, value) in &self.headers {
            candidate = candidate.with_header(name, value)?;
        }

        Ok(candidate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub transport: TransportConfig,
    /// Mirrors in priority order
    pub mirrors: Vec<MirrorConfig>,
    /// Try the reference's own registry after every mirror failed
    pub fallback_to_origin: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            mirrors: Vec::new(),
            fallback_to_origin: true,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        for mirror in &self.mirrors {
            mirror.to_candidate()?;
        }
        Ok(())
    }

    pub fn candidates_for(&self, reference: &ImageReference) -> Result<CandidateList> {
        let candidates = self
            .mirrors
            .iter()
            .map(MirrorConfig::to_candidate)
            .collect::<Result<CandidateList>>()?;

        if self.fallback_to_origin {
            Ok(candidates.with_origin(reference))
        } else {
            Ok(candidates)
        }
    }
}
