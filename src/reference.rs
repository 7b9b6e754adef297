//! Image reference parsing
//!
//! Parses OCI-style references of the form `[host[:port]/]repository[:tag|@digest]`:
//! - `ubuntu` -> docker.io/library/ubuntu:latest
//! - `docker.io/library/ubuntu:22.04`
//! - `registry.example.com/myorg/myapp/image:latest`
//! - `localhost:5000/app@sha256:abc...`

use crate::digest::Digest;
use crate::error::{RegistryError, Result};
use std::fmt;

pub const DEFAULT_HOST: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
const OFFICIAL_NAMESPACE: &str = "library";
const MAX_TAG_LEN: usize = 128;

/// What a reference points at inside its repository.
///
/// There is deliberately no `Display` impl: a tag and a digest join the
/// repository name with different separators, so callers must pick the
/// formatting for the variant they hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Tag(String),
    Digest(Digest),
}

impl Locator {
    pub fn tag(tag: &str) -> Result<Self> {
        validate_tag(tag)?;
        Ok(Locator::Tag(tag.to_string()))
    }

    pub fn digest(digest: &str) -> Result<Self> {
        Ok(Locator::Digest(Digest::parse(digest)?))
    }

    /// The bare tag or digest, without any separator
    pub fn as_str(&self) -> &str {
        match self {
            Locator::Tag(tag) => tag,
            Locator::Digest(digest) => digest.as_str(),
        }
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, Locator::Digest(_))
    }
}

/// Parsed image reference. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    host: String,
    repository: Vec<String>,
    locator: Locator,
}

impl ImageReference {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RegistryError::Parse("Empty image reference".to_string()));
        }

        let (host, remainder) = match raw.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => (first, rest),
            _ => (DEFAULT_HOST, raw),
        };
        validate_host(host)?;

        let (name, locator) = if let Some((name, digest)) = remainder.rsplit_once('@') {
            // `name:tag@digest` pins by digest; the tag is informational only
            (strip_tag(name), Locator::digest(digest)?)
        } else if let Some((name, tag)) = remainder.rsplit_once(':') {
            (name, Locator::tag(tag)?)
        } else {
            (remainder, Locator::Tag(DEFAULT_TAG.to_string()))
        };

        let mut repository = name
            .split('/')
            .map(|segment| validate_path_segment(segment, raw).map(|_| segment.to_string()))
            .collect::<Result<Vec<_>>>()?;

        if host == DEFAULT_HOST && repository.len() == 1 {
            repository.insert(0, OFFICIAL_NAMESPACE.to_string());
        }

        Ok(Self {
            host: host.to_string(),
            repository,
            locator,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository path joined with `/`, e.g. `library/ubuntu`
    pub fn repository(&self) -> String {
        self.repository.join("/")
    }

    pub fn repository_segments(&self) -> &[String] {
        &self.repository
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Same repository, pointed at a different tag or digest
    pub fn with_locator(&self, locator: Locator) -> Self {
        Self {
            host: self.host.clone(),
            repository: self.repository.clone(),
            locator,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            Locator::Tag(tag) => write!(f, "{}/{}:{}", self.host, self.repository(), tag),
            Locator::Digest(digest) => write!(f, "{}/{}@{}", self.host, self.repository(), digest),
        }
    }
}

impl std::str::FromStr for ImageReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn looks_like_host(candidate: &str) -> bool {
    candidate.contains('.') || candidate.contains(':') || candidate == "localhost"
}

fn strip_tag(name: &str) -> &str {
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_slash..].find(':') {
        Some(colon) => &name[..last_slash + colon],
        None => name,
    }
}

fn validate_host(host: &str) -> Result<()> {
    let (name, port) = if host.starts_with('[') {
        // [ipv6]:port
        match host.rsplit_once("]:") {
            Some((name, port)) => (&name[1..], Some(port)),
            None => (host.trim_start_matches('[').trim_end_matches(']'), None),
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) => (name, Some(port)),
            None => (host, None),
        }
    };

    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
    {
        return Err(RegistryError::Parse(format!("Invalid registry host: {}", host)));
    }
    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return Err(RegistryError::Parse(format!("Invalid registry port in host: {}", host)));
        }
    }
    Ok(())
}

// [a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*
fn validate_path_segment(segment: &str, raw: &str) -> Result<()> {
    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts_and_ends_alnum =
        segment.starts_with(is_alnum) && segment.ends_with(is_alnum);
    let separators_valid = segment
        .split(is_alnum)
        .filter(|run| !run.is_empty())
        .all(|run| matches!(run, "." | "_" | "__") || run.bytes().all(|b| b == b'-'));

    if starts_and_ends_alnum && separators_valid {
        Ok(())
    } else {
        Err(RegistryError::Parse(format!(
            "Invalid repository path component '{}' in {}",
            segment, raw
        )))
    }
}

// [\w][\w.-]{0,127}
fn validate_tag(tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(RegistryError::Parse(format!("Invalid tag: '{}'", tag)))
    }
}
