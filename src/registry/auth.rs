//! Credential collaborator interface
//!
//! The fetch coordinator asks a [`CredentialProvider`] for an `Authorization`
//! header value per host, at most twice per candidate: once up front and once
//! more after the registry rejects the first attempt. Token exchange, keychains
//! and credential helpers live behind this trait.

use crate::error::Result;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::{BTreeMap, HashMap};

/// Parsed `WWW-Authenticate` challenge, e.g.
/// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: String,
    pub params: BTreeMap<String, String>,
}

impl AuthChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(' ') {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };
        if scheme.is_empty() {
            return None;
        }

        let mut params = BTreeMap::new();
        for param in split_params(rest) {
            if let Some((key, value)) = param.split_once('=') {
                params.insert(
                    key.trim().to_ascii_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }

        Some(Self {
            scheme: scheme.to_string(),
            params,
        })
    }

    pub fn realm(&self) -> Option<&str> {
        self.params.get("realm").map(String::as_str)
    }

    pub fn service(&self) -> Option<&str> {
        self.params.get("service").map(String::as_str)
    }

    pub fn scope(&self) -> Option<&str> {
        self.params.get("scope").map(String::as_str)
    }
}

// Commas inside quoted values (scope lists) do not separate parameters
fn split_params(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(raw[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(raw[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// One credential lookup for a registry host
#[derive(Debug, Clone, Copy)]
pub struct CredentialRequest<'a> {
    pub host: &'a str,
    /// True on the single retry after a 401/403
    pub refresh: bool,
    /// Challenge returned with the rejected response, if any
    pub challenge: Option<&'a AuthChallenge>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return the `Authorization` header value to send, or `None` for an
    /// anonymous request.
    async fn credentials_for(&self, request: CredentialRequest<'_>) -> Result<Option<String>>;
}

#[async_trait]
impl<F> CredentialProvider for F
where
    F: Fn(&str) -> Result<Option<String>> + Send + Sync,
{
    async fn credentials_for(&self, request: CredentialRequest<'_>) -> Result<Option<String>> {
        self(request.host)
    }
}

/// Never sends credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialProvider for Anonymous {
    async fn credentials_for(&self, _request: CredentialRequest<'_>) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Clone)]
pub enum StaticCredential {
    Basic { username: String, password: String },
    Bearer(String),
}

impl StaticCredential {
    pub fn header_value(&self) -> String {
        match self {
            StaticCredential::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
            }
            StaticCredential::Bearer(token) => format!("Bearer {}", token),
        }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaticCredential::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
            StaticCredential::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// Fixed per-host credentials; hosts without an entry are anonymous
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    hosts: HashMap<String, StaticCredential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_basic(mut self, host: &str, username: &str, password: &str) -> Self {
        self.hosts.insert(
            host.to_string(),
            StaticCredential::Basic {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self
    }

    pub fn with_bearer(mut self, host: &str, token: &str) -> Self {
        self.hosts
            .insert(host.to_string(), StaticCredential::Bearer(token.to_string()));
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials_for(&self, request: CredentialRequest<'_>) -> Result<Option<String>> {
        Ok(self.hosts.get(request.host).map(StaticCredential::header_value))
    }
}
