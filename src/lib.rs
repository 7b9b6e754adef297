//! Remote Resolver Library
//!
//! Remote-content resolution for lazily fetched image layers: parses image
//! references, resolves them against registry mirrors, builds digest-addressed
//! registry URLs and fetches content from the first host that serves it.

pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod reference;
pub mod registry;

pub use config::{MirrorConfig, ResolverConfig, TransportConfig};
pub use digest::Digest;
pub use error::{ErrorKind, RegistryError, Result};
pub use logging::Logger;
pub use reference::{ImageReference, Locator};
pub use registry::{CandidateList, FetchedContent, RegistryHostCandidate, RemoteFetcher, ResolvedRepository, Scheme};
