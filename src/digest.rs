//! Content digest parsing and verification
//!
//! Digests are carried verbatim (`<algorithm>:<encoded>`) through URL
//! construction. Only the syntax is validated here; the encoded part is not
//! required to have the canonical length so that registries using short or
//! non-sha256 identifiers still resolve.

use crate::error::{RegistryError, Result};
use sha2::Digest as _;
use std::fmt;

pub const SHA256_PREFIX: &str = "sha256:";

/// A syntactically valid content digest, e.g. `sha256:<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn parse(raw: &str) -> Result<Self> {
        let (algorithm, encoded) = raw
            .split_once(':')
            .ok_or_else(|| RegistryError::Parse(format!("Digest missing algorithm prefix: {}", raw)))?;

        if !Self::is_valid_algorithm(algorithm) {
            return Err(RegistryError::Parse(format!(
                "Invalid digest algorithm '{}' in {}",
                algorithm, raw
            )));
        }
        if encoded.is_empty()
            || !encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'))
        {
            return Err(RegistryError::Parse(format!(
                "Invalid encoded digest in {}",
                raw
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or_default()
    }

    // [a-z0-9]+([+._-][a-z0-9]+)*
    fn is_valid_algorithm(algorithm: &str) -> bool {
        !algorithm.is_empty()
            && algorithm.split(['+', '.', '_', '-']).all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Utilities for computing and checking sha256 digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        hex::encode(sha2::Sha256::digest(data))
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Verify data matches the expected digest.
    ///
    /// Returns `Ok(false)` when the digest is not a canonical sha256 digest and
    /// therefore cannot be checked here.
    pub fn verify_data_integrity(data: &[u8], expected: &Digest) -> Result<bool> {
        if expected.algorithm() != "sha256" || !Self::is_valid_sha256_hex(expected.encoded()) {
            return Ok(false);
        }

        let computed = Self::compute_sha256(data);
        if !computed.eq_ignore_ascii_case(expected.encoded()) {
            return Err(RegistryError::Validation(format!(
                "Data integrity check failed: expected {}, computed {}{}",
                expected, SHA256_PREFIX, computed
            )));
        }

        Ok(true)
    }
}
