//! Repository resolution
//!
//! Combines a reference with a host candidate. The candidate decides where to
//! ask; the repository path always comes from the reference.

use crate::reference::{ImageReference, Locator};
use crate::registry::host::{RegistryHostCandidate, Scheme};

/// Effective repository location at one registry host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    scheme: Scheme,
    host: String,
    api_path_prefix: String,
    repository: String,
}

impl ResolvedRepository {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api_path_prefix(&self) -> &str {
        &self.api_path_prefix
    }

    /// Repository path, never prefixed with a host
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn is_plain_http(&self) -> bool {
        self.scheme == Scheme::Http
    }

    /// `host/repository`, the name part of a reference at this location
    pub fn name(&self) -> String {
        format!("{}/{}", self.host, self.repository)
    }

    /// Reference string for `locator` at this location.
    ///
    /// Digests join with `@` and tags with `:`.
    pub fn reference_string(&self, locator: &Locator) -> String {
        match locator {
            Locator::Digest(digest) => crate::registry::urls::digest_reference(self, digest),
            Locator::Tag(tag) => crate::registry::urls::tag_reference(self, tag),
        }
    }
}

/// Resolve `reference` against `candidate`, or against the reference's own
/// registry when no candidate is given.
pub fn resolve(reference: &ImageReference, candidate: Option<&RegistryHostCandidate>) -> ResolvedRepository {
    match candidate {
        Some(candidate) => resolve_with(reference, candidate),
        None => resolve_with(reference, &RegistryHostCandidate::origin(reference)),
    }
}

fn resolve_with(reference: &ImageReference, candidate: &RegistryHostCandidate) -> ResolvedRepository {
    ResolvedRepository {
        scheme: candidate.scheme(),
        host: candidate.host().to_string(),
        api_path_prefix: candidate.api_path_prefix().to_string(),
        repository: reference.repository(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(prefix: &str) -> RegistryHostCandidate {
        RegistryHostCandidate::new(Scheme::Http, "mirror.local:5000")
            .unwrap()
            .with_api_path_prefix(prefix)
            .unwrap()
    }

    #[test]
    fn test_no_candidate_uses_origin() {
        let reference = ImageReference::parse("docker.io/library/ubuntu:latest").unwrap();
        let resolved = resolve(&reference, None);
        assert_eq!(resolved.host(), "docker.io");
        assert_eq!(resolved.scheme(), Scheme::Https);
        assert_eq!(resolved.api_path_prefix(), "/v2");
        assert_eq!(resolved.repository(), "library/ubuntu");
        assert!(!resolved.is_plain_http());

        let implicit = RegistryHostCandidate::origin(&reference);
        assert_eq!(resolved, resolve(&reference, Some(&implicit)));
    }

    #[test]
    fn test_mirror_keeps_repository_path() {
        let reference = ImageReference::parse("docker.io/library/ubuntu:latest").unwrap();
        let resolved = resolve(&reference, Some(&mirror("/v2")));

        assert_eq!(resolved.host(), "mirror.local:5000");
        assert_eq!(resolved.repository(), "library/ubuntu");
        assert!(resolved.is_plain_http());
        assert!(resolved.name().contains("mirror.local:5000/library/ubuntu"));
        assert_eq!(
            resolved.reference_string(reference.locator()),
            "mirror.local:5000/library/ubuntu:latest"
        );
    }

    #[test]
    fn test_repository_never_contains_host() {
        let reference = ImageReference::parse("registry.example.com/myorg/myapp/image:latest").unwrap();
        let resolved = resolve(&reference, Some(&mirror("/custom/v2")));

        assert_eq!(resolved.repository(), "myorg/myapp/image");
        assert!(!resolved.repository().contains("mirror.local"));
        assert!(!resolved.repository().contains("registry.example.com"));
        assert_eq!(resolved.api_path_prefix(), "/custom/v2");
    }
}
