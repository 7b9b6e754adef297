//! Registry module for mirror-aware registry interactions
//!
//! Host candidates, repository resolution, URL construction, credentials,
//! transport and the fetch coordinator that ties them together.

pub mod auth;
pub mod fetch;
pub mod host;
pub mod resolve;
pub mod transport;
pub mod urls;

pub use auth::{Anonymous, AuthChallenge, CredentialProvider, CredentialRequest, StaticCredentials};
pub use fetch::{FetchedContent, RemoteFetcher};
pub use host::{CandidateList, DEFAULT_API_PATH_PREFIX, RegistryHostCandidate, Scheme};
pub use resolve::{ResolvedRepository, resolve};
pub use transport::{BlobStream, HttpTransport, RegistryTransport, TransportRequest, TransportResponse};
