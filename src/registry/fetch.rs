//! Remote fetch coordinator
//!
//! Walks the host candidates in priority order, one at a time, and returns the
//! first successful response. Failures at a candidate are logged and turn into
//! a move to the next candidate; only the terminal outcome is returned.
//!
//! Per candidate:
//! - 2xx: success, stop.
//! - 401/403: ask the credential provider once more and retry the same host
//!   once; a second rejection moves on.
//! - 404, 5xx, other statuses, connection errors: move on.
//!
//! Cancellation aborts the in-flight request and is never retried. The token
//! keeps guarding the returned body stream after the fetch succeeds.

use crate::config::ResolverConfig;
use crate::digest::{Digest, DigestUtils};
use crate::error::handlers::{HttpErrorHandler, StatusClass};
use crate::error::{ErrorKind, RegistryError, Result};
use crate::logging::Logger;
use crate::reference::{ImageReference, Locator};
use crate::registry::auth::{AuthChallenge, CredentialRequest};
use crate::registry::host::{CandidateList, RegistryHostCandidate};
use crate::registry::resolve::{ResolvedRepository, resolve};
use crate::registry::transport::{
    BlobStream, HttpTransport, RegistryTransport, TransportRequest, TransportResponse,
};
use crate::registry::urls;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Successful fetch result
///
/// `stream` ends with [`RegistryError::Cancelled`] once the fetch's token fires.
pub struct FetchedContent {
    /// Host of the candidate that served the content
    pub host: String,
    pub url: String,
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub docker_content_digest: Option<String>,
    pub stream: BlobStream,
}

impl FetchedContent {
    fn from_response(host: &str, url: String, response: TransportResponse, cancel: &CancellationToken) -> Self {
        Self {
            host: host.to_string(),
            url,
            status: response.status,
            content_length: response.content_length(),
            content_type: response.content_type().map(str::to_string),
            docker_content_digest: response.header(DOCKER_CONTENT_DIGEST).map(str::to_string),
            stream: cancellable(response.body, cancel.clone(), host.to_string()),
        }
    }

    /// Read the whole body into memory
    pub async fn into_bytes(self) -> Result<Bytes> {
        let capacity = self.content_length.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut buf = BytesMut::with_capacity(capacity);
        let mut stream = self.stream;
        while let Some(chunk) = stream.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Read the whole body and check it against `digest` when it is a
    /// canonical sha256 digest
    pub async fn into_verified_bytes(self, digest: &Digest) -> Result<Bytes> {
        let data = self.into_bytes().await?;
        DigestUtils::verify_data_integrity(&data, digest)?;
        Ok(data)
    }
}

fn cancellable(stream: BlobStream, cancel: CancellationToken, host: String) -> BlobStream {
    futures::stream::unfold(Some((stream, cancel, host)), |state| async move {
        let (mut stream, cancel, host) = state?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some((Err(RegistryError::Cancelled { host: Some(host) }), None)),
            next = stream.next() => next.map(|chunk| (chunk, Some((stream, cancel, host)))),
        }
    })
    .boxed()
}

impl std::fmt::Debug for FetchedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedContent")
            .field("host", &self.host)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Blob(&'a Digest),
    Manifest(&'a Locator),
}

impl Target<'_> {
    fn url(&self, resolved: &ResolvedRepository) -> String {
        match self {
            Target::Blob(digest) => urls::blob_url(resolved, digest),
            Target::Manifest(locator) => urls::manifest_url(resolved, locator),
        }
    }

    fn describe(&self, resolved: &ResolvedRepository) -> String {
        match self {
            Target::Blob(digest) => format!("blob {}", urls::digest_reference(resolved, digest)),
            Target::Manifest(locator) => format!("manifest {}", resolved.reference_string(locator)),
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Target::Blob(_) => "blob fetch",
            Target::Manifest(_) => "manifest fetch",
        }
    }
}

/// Iterates registry host candidates to fetch blobs and manifests
#[derive(Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn RegistryTransport>,
    output: Logger,
}

impl RemoteFetcher {
    pub fn new(transport: Arc<dyn RegistryTransport>) -> Self {
        Self {
            transport,
            output: Logger::default(),
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(Arc::new(HttpTransport::new(&config.transport)?)))
    }

    pub fn with_logger(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    /// Fetch blob `digest` of `reference`'s repository from the first
    /// candidate that serves it.
    pub async fn fetch_blob(
        &self,
        reference: &ImageReference,
        candidates: &CandidateList,
        digest: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent> {
        let digest = Digest::parse(digest)?;
        self.fetch(reference, candidates, Target::Blob(&digest), cancel).await
    }

    pub async fn fetch_manifest(
        &self,
        reference: &ImageReference,
        candidates: &CandidateList,
        locator: &Locator,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent> {
        self.fetch(reference, candidates, Target::Manifest(locator), cancel).await
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        candidates: &CandidateList,
        target: Target<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent> {
        let candidates = candidates.effective(reference);
        let attempted = candidates.len();

        let mut last_error: Option<RegistryError> = None;
        let mut all_auth = true;
        let mut all_not_found = true;

        for (index, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RegistryError::Cancelled {
                    host: last_error.as_ref().and_then(|e| e.last_host()).map(str::to_string),
                });
            }

            let resolved = resolve(reference, Some(candidate));
            let url = target.url(&resolved);
            self.output.detail(&format!(
                "Trying candidate {}/{} for {}: {}",
                index + 1,
                attempted,
                target.operation(),
                url
            ));

            match self.try_candidate(candidate, &resolved, url, target, cancel).await {
                Ok(content) => {
                    self.output
                        .info(&format!("Fetched {} from {}", target.describe(&resolved), content.host));
                    return Ok(content);
                }
                Err(err @ RegistryError::Cancelled { .. }) => return Err(err),
                Err(err) => {
                    match err.kind() {
                        ErrorKind::Auth => all_not_found = false,
                        ErrorKind::NotFound => all_auth = false,
                        _ => {
                            all_auth = false;
                            all_not_found = false;
                        }
                    }
                    self.output.warning(&format!(
                        "Candidate {} failed for {}: {}",
                        candidate.host(),
                        target.operation(),
                        err
                    ));
                    last_error = Some(err);
                }
            }
        }

        let Some(last) = last_error else {
            return Err(RegistryError::Validation("No registry hosts to try".to_string()));
        };

        if all_auth || all_not_found {
            return Err(last);
        }

        let last_host = last.last_host().unwrap_or_default().to_string();
        self.output.error(&format!(
            "All {} registry host(s) failed for {}, last tried {}",
            attempted,
            target.operation(),
            last_host
        ));
        Err(RegistryError::Exhausted {
            last_host,
            attempted,
            source: Box::new(last),
        })
    }

    async fn try_candidate(
        &self,
        candidate: &RegistryHostCandidate,
        resolved: &ResolvedRepository,
        url: String,
        target: Target<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent> {
        let host = candidate.host();

        let request = CredentialRequest {
            host,
            refresh: false,
            challenge: None,
        };
        let auth = self.credentials(candidate, request, cancel).await?;
        let mut response = self.send(candidate, &url, target, auth, cancel).await?;

        if StatusClass::of(response.status) == StatusClass::Unauthorized {
            let challenge = response.header(WWW_AUTHENTICATE.as_str()).and_then(AuthChallenge::parse);
            self.output.info(&format!(
                "{} rejected request with {}, refreshing credentials",
                host, response.status
            ));
            drop(response);

            let request = CredentialRequest {
                host,
                refresh: true,
                challenge: challenge.as_ref(),
            };
            let auth = self.credentials(candidate, request, cancel).await?;
            response = self.send(candidate, &url, target, auth, cancel).await?;
        }

        let status = response.status;
        match StatusClass::of(status) {
            StatusClass::Success => Ok(FetchedContent::from_response(host, url, response, cancel)),
            StatusClass::Unauthorized => Err(RegistryError::Auth {
                host: host.to_string(),
                status: status.as_u16(),
            }),
            StatusClass::NotFound => Err(RegistryError::NotFound {
                host: host.to_string(),
                what: target.describe(resolved),
            }),
            StatusClass::Retryable => {
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RegistryError::Cancelled { host: Some(host.to_string()) });
                    }
                    body = response.error_text() => body,
                };
                Err(RegistryError::Transient {
                    host: host.to_string(),
                    status: Some(status.as_u16()),
                    message: HttpErrorHandler::describe_status(status, &body, target.operation()),
                })
            }
        }
    }

    async fn credentials(
        &self,
        candidate: &RegistryHostCandidate,
        request: CredentialRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let host = request.host;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RegistryError::Cancelled { host: Some(host.to_string()) }),
            result = candidate.credentials().credentials_for(request) => result.map_err(|e| match e {
                err @ RegistryError::Cancelled { .. } => err,
                other => RegistryError::Credential {
                    host: host.to_string(),
                    message: other.to_string(),
                },
            }),
        }
    }

    async fn send(
        &self,
        candidate: &RegistryHostCandidate,
        url: &str,
        target: Target<'_>,
        auth: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse> {
        let host = candidate.host();

        let mut request = TransportRequest::get(url);
        for (name, value) in candidate.headers() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Target::Manifest(_) = target {
            request = request.header(ACCEPT.as_str(), urls::manifest_accept_header());
        }
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION.as_str(), auth);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RegistryError::Cancelled { host: Some(host.to_string()) }),
            result = self.transport.get(request) => result.map_err(|e| match e {
                err @ RegistryError::Cancelled { .. } => err,
                RegistryError::Network(message) => RegistryError::Transient {
                    host: host.to_string(),
                    status: None,
                    message,
                },
                other => RegistryError::Transient {
                    host: host.to_string(),
                    status: None,
                    message: other.to_string(),
                },
            }),
        }
    }
}
