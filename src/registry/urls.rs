//! Registry API URL and reference construction
//!
//! Blob and manifest endpoints are path-segment addressed:
//! `<scheme>://<host><prefix>/<repository>/blobs/<digest>`. Composed reference
//! strings are separator addressed, `@` for digests and `:` for tags, and the
//! two forms have separate functions so the separator is never guessed.

use crate::digest::Digest;
use crate::reference::Locator;
use crate::registry::resolve::ResolvedRepository;

pub const MANIFEST_ACCEPT_TYPES: &[&str] = &[
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

fn repository_base(resolved: &ResolvedRepository) -> String {
    format!(
        "{}://{}{}/{}",
        resolved.scheme(),
        resolved.host(),
        resolved.api_path_prefix(),
        resolved.repository()
    )
}

/// URL of the blob `digest` in `resolved`; the digest is the final path
/// segment, unchanged.
pub fn blob_url(resolved: &ResolvedRepository, digest: &Digest) -> String {
    format!("{}/blobs/{}", repository_base(resolved), digest)
}

pub fn manifest_url(resolved: &ResolvedRepository, locator: &Locator) -> String {
    format!("{}/manifests/{}", repository_base(resolved), locator.as_str())
}

/// `host/repository@digest`
pub fn digest_reference(resolved: &ResolvedRepository, digest: &Digest) -> String {
    format!("{}@{}", resolved.name(), digest)
}

/// `host/repository:tag`
pub fn tag_reference(resolved: &ResolvedRepository, tag: &str) -> String {
    format!("{}:{}", resolved.name(), tag)
}

pub fn manifest_accept_header() -> String {
    MANIFEST_ACCEPT_TYPES.join(", ")
}
