use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use remote_resolver::digest::DigestUtils;
use remote_resolver::registry::{
    CredentialProvider, CredentialRequest, RegistryTransport, StaticCredentials, TransportRequest,
    TransportResponse,
};
use remote_resolver::{
    CandidateList, Digest, ErrorKind, ImageReference, Locator, RegistryError, RegistryHostCandidate,
    RemoteFetcher, Result, Scheme,
};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DIGEST: &str = "sha256:abc123";

#[derive(Clone)]
enum Reply {
    Status(u16, &'static str),
    Challenge(u16, &'static str),
    ConnectError,
    Hang,
    /// 200 that sends one chunk and then never finishes the body
    Stalled(&'static str),
}

/// In-memory registry: replies are queued per URL, unknown URLs return 404
#[derive(Default)]
struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    fn reply(self, url: &str, reply: Reply) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.url).collect()
    }
}

fn response(status: u16, body: &'static str, headers: HeaderMap) -> TransportResponse {
    TransportResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
        body: futures::stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))]).boxed(),
    }
}

#[async_trait]
impl RegistryTransport for MockTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Status(404, ""));

        match reply {
            Reply::Status(status, body) => Ok(response(status, body, HeaderMap::new())),
            Reply::Challenge(status, challenge) => {
                let mut headers = HeaderMap::new();
                headers.insert("www-authenticate", HeaderValue::from_static(challenge));
                Ok(response(status, "", headers))
            }
            Reply::ConnectError => Err(RegistryError::Network("connection refused".to_string())),
            Reply::Hang => futures::future::pending::<Result<TransportResponse>>().await,
            Reply::Stalled(chunk) => Ok(TransportResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: futures::stream::once(async move { Ok(Bytes::from_static(chunk.as_bytes())) })
                    .chain(futures::stream::pending())
                    .boxed(),
            }),
        }
    }
}

/// Records every lookup and hands out a different token on refresh
#[derive(Default)]
struct RecordingCredentials {
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, bool, Option<String>)>>,
}

#[async_trait]
impl CredentialProvider for RecordingCredentials {
    async fn credentials_for(&self, request: CredentialRequest<'_>) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            request.host.to_string(),
            request.refresh,
            request.challenge.and_then(|c| c.realm()).map(str::to_string),
        ));
        Ok(Some(if request.refresh { "Bearer fresh" } else { "Bearer stale" }.to_string()))
    }
}

struct FailingCredentials;

#[async_trait]
impl CredentialProvider for FailingCredentials {
    async fn credentials_for(&self, _request: CredentialRequest<'_>) -> Result<Option<String>> {
        Err(RegistryError::Network("keychain unavailable".to_string()))
    }
}

fn mirror(host: &str) -> RegistryHostCandidate {
    RegistryHostCandidate::new(Scheme::Http, host).unwrap()
}

fn blob_url(host: &str) -> String {
    format!("http://{}/v2/myorg/app/blobs/{}", host, DIGEST)
}

fn app_reference() -> ImageReference {
    ImageReference::parse("registry.example.com/myorg/app:latest").unwrap()
}

fn fetcher(transport: &Arc<MockTransport>) -> RemoteFetcher {
    RemoteFetcher::new(transport.clone())
}

#[tokio::test]
async fn test_falls_through_404_to_next_mirror() {
    let transport = Arc::new(
        MockTransport::default()
            .reply(&blob_url("mirror-a:5000"), Reply::Status(404, ""))
            .reply(&blob_url("mirror-b:5000"), Reply::Status(200, "layer-bytes")),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000"), mirror("mirror-b:5000")]);

    let content = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(content.host, "mirror-b:5000");
    assert_eq!(content.url, blob_url("mirror-b:5000"));
    assert_eq!(content.into_bytes().await.unwrap(), Bytes::from_static(b"layer-bytes"));
    assert_eq!(transport.urls(), vec![blob_url("mirror-a:5000"), blob_url("mirror-b:5000")]);
}

#[tokio::test]
async fn test_empty_candidates_fetch_from_origin() {
    let url = "https://docker.io/v2/library/ubuntu/blobs/sha256:abc123";
    let transport = Arc::new(
        MockTransport::default()
            .reply(url, Reply::Status(200, "x"))
            .reply(url, Reply::Status(200, "x")),
    );
    let reference = ImageReference::parse("docker.io/library/ubuntu:latest").unwrap();

    let implicit = fetcher(&transport)
        .fetch_blob(&reference, &CandidateList::new(), DIGEST, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(implicit.host, "docker.io");

    let explicit = CandidateList::from(vec![RegistryHostCandidate::origin(&reference)]);
    let explicit = fetcher(&transport)
        .fetch_blob(&reference, &explicit, DIGEST, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(explicit.host, implicit.host);
    assert_eq!(explicit.url, implicit.url);

    assert_eq!(transport.urls(), vec![url.to_string(), url.to_string()]);
}

#[tokio::test]
async fn test_refreshes_credentials_once_then_succeeds() {
    let url = blob_url("mirror-a:5000");
    let transport = Arc::new(
        MockTransport::default()
            .reply(&url, Reply::Challenge(401, r#"Bearer realm="https://auth.example.com/token",service="mirror""#))
            .reply(&url, Reply::Status(200, "ok")),
    );
    let credentials = Arc::new(RecordingCredentials::default());
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000").with_credentials(credentials.clone())]);

    let content = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(content.host, "mirror-a:5000");

    assert_eq!(credentials.calls.load(Ordering::SeqCst), 2);
    let seen = credentials.seen.lock().unwrap().clone();
    assert_eq!(seen[0], ("mirror-a:5000".to_string(), false, None));
    assert_eq!(
        seen[1],
        ("mirror-a:5000".to_string(), true, Some("https://auth.example.com/token".to_string()))
    );

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].header_value("authorization"), Some("Bearer stale"));
    assert_eq!(calls[1].header_value("authorization"), Some("Bearer fresh"));
}

#[tokio::test]
async fn test_repeated_rejection_advances_to_next_candidate() {
    let transport = Arc::new(
        MockTransport::default()
            .reply(&blob_url("mirror-a:5000"), Reply::Status(403, ""))
            .reply(&blob_url("mirror-a:5000"), Reply::Status(403, ""))
            .reply(&blob_url("mirror-a:5000"), Reply::Status(200, "never reached"))
            .reply(&blob_url("mirror-b:5000"), Reply::Status(200, "ok")),
    );
    let credentials = Arc::new(RecordingCredentials::default());
    let candidates = CandidateList::from(vec![
        mirror("mirror-a:5000").with_credentials(credentials.clone()),
        mirror("mirror-b:5000"),
    ]);

    let content = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(content.host, "mirror-b:5000");
    assert_eq!(credentials.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        transport.urls(),
        vec![blob_url("mirror-a:5000"), blob_url("mirror-a:5000"), blob_url("mirror-b:5000")]
    );
}

#[tokio::test]
async fn test_absent_everywhere_is_not_found() {
    let transport = Arc::new(MockTransport::default());
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000"), mirror("mirror-b:5000")]);

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.last_host(), Some("mirror-b:5000"));
    assert!(err.to_string().contains("mirror-b:5000/myorg/app@sha256:abc123"));
}

#[tokio::test]
async fn test_rejected_everywhere_is_auth_error() {
    let transport = Arc::new(
        MockTransport::default()
            .reply(&blob_url("mirror-a:5000"), Reply::Status(401, ""))
            .reply(&blob_url("mirror-a:5000"), Reply::Status(401, ""))
            .reply(&blob_url("mirror-b:5000"), Reply::Status(401, ""))
            .reply(&blob_url("mirror-b:5000"), Reply::Status(403, "")),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000"), mirror("mirror-b:5000")]);

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.last_host(), Some("mirror-b:5000"));
    assert_eq!(err.status(), Some(403));
    assert_eq!(transport.calls().len(), 4);
}

#[tokio::test]
async fn test_mixed_failures_exhaust_with_last_cause() {
    let transport = Arc::new(
        MockTransport::default()
            .reply(&blob_url("mirror-a:5000"), Reply::ConnectError)
            .reply(&blob_url("mirror-b:5000"), Reply::Status(404, ""))
            .reply(
                &blob_url("registry.example.com"),
                Reply::Status(503, r#"{"errors":[{"code":"UNAVAILABLE","message":"try later"}]}"#),
            ),
    );
    let candidates = CandidateList::from(vec![
        mirror("mirror-a:5000"),
        mirror("mirror-b:5000"),
        mirror("registry.example.com"),
    ]);

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Exhausted);
    assert!(err.is_retryable());
    assert_eq!(err.last_host(), Some("registry.example.com"));
    assert_eq!(err.status(), Some(503));
    match &err {
        RegistryError::Exhausted { attempted, source, .. } => {
            assert_eq!(*attempted, 3);
            assert_eq!(source.kind(), ErrorKind::Transient);
            assert!(source.to_string().contains("UNAVAILABLE: try later"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_error_on_last_candidate() {
    let transport = Arc::new(
        MockTransport::default()
            .reply(&blob_url("mirror-a:5000"), Reply::Status(500, ""))
            .reply(&blob_url("mirror-b:5000"), Reply::ConnectError),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000"), mirror("mirror-b:5000")]);

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Exhausted);
    assert_eq!(err.last_host(), Some("mirror-b:5000"));
    assert_eq!(err.status(), None);
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_cancellation_aborts_without_advancing() {
    let transport = Arc::new(
        MockTransport::default()
            .reply(&blob_url("mirror-a:5000"), Reply::Hang)
            .reply(&blob_url("mirror-b:5000"), Reply::Status(200, "ok")),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000"), mirror("mirror-b:5000")]);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.last_host(), Some("mirror-a:5000"));
    assert_eq!(transport.urls(), vec![blob_url("mirror-a:5000")]);
}

#[tokio::test]
async fn test_cancellation_stops_body_read() {
    let transport = Arc::new(MockTransport::default().reply(&blob_url("mirror-a:5000"), Reply::Stalled("partial")));
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000")]);
    let cancel = CancellationToken::new();

    let content = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &cancel)
        .await
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), content.into_bytes())
        .await
        .expect("body read should stop once the token fires")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.last_host(), Some("mirror-a:5000"));
}

#[tokio::test]
async fn test_cancelled_stream_yields_error_then_ends() {
    let transport = Arc::new(MockTransport::default().reply(&blob_url("mirror-a:5000"), Reply::Stalled("partial")));
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000")]);
    let cancel = CancellationToken::new();

    let mut content = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &cancel)
        .await
        .unwrap();

    cancel.cancel();
    let first = content.stream.next().await.unwrap();
    assert_eq!(first.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(content.stream.next().await.is_none());
}

#[tokio::test]
async fn test_already_cancelled_makes_no_requests() {
    let transport = Arc::new(MockTransport::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &CandidateList::new(), DIGEST, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_digest_fails_before_network() {
    let transport = Arc::new(MockTransport::default());

    let err = fetcher(&transport)
        .fetch_blob(&app_reference(), &CandidateList::new(), "abc123", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_credential_failure_moves_to_next_candidate() {
    let transport = Arc::new(MockTransport::default().reply(&blob_url("mirror-b:5000"), Reply::Status(200, "ok")));
    let candidates = CandidateList::from(vec![
        mirror("mirror-a:5000").with_credentials(Arc::new(FailingCredentials)),
        mirror("mirror-b:5000"),
    ]);

    let content = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(content.host, "mirror-b:5000");
    assert_eq!(transport.urls(), vec![blob_url("mirror-b:5000")]);
}

#[tokio::test]
async fn test_candidate_headers_and_static_credentials_are_sent() {
    let transport = Arc::new(MockTransport::default().reply(&blob_url("mirror-a:5000"), Reply::Status(200, "ok")));
    let credentials = StaticCredentials::new().with_basic("mirror-a:5000", "user", "pass");
    let candidates = CandidateList::from(vec![
        mirror("mirror-a:5000")
            .with_header("X-Mirror-Pull", "lazy")
            .unwrap()
            .with_credentials(Arc::new(credentials)),
    ]);

    fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, DIGEST, &CancellationToken::new())
        .await
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].header_value("x-mirror-pull"), Some("lazy"));
    assert_eq!(calls[0].header_value("authorization"), Some("Basic dXNlcjpwYXNz"));
    assert_eq!(calls[0].header_value("accept"), None);
}

#[tokio::test]
async fn test_manifest_fetch_by_tag_and_digest() {
    let transport = Arc::new(
        MockTransport::default()
            .reply("http://mirror-a:5000/v2/myorg/app/manifests/latest", Reply::Status(200, "{}"))
            .reply("http://mirror-a:5000/v2/myorg/app/manifests/sha256:abc123", Reply::Status(200, "{}")),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000")]);
    let reference = app_reference();

    let by_tag = fetcher(&transport)
        .fetch_manifest(&reference, &candidates, reference.locator(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(by_tag.host, "mirror-a:5000");

    let by_digest = Locator::digest(DIGEST).unwrap();
    fetcher(&transport)
        .fetch_manifest(&reference, &candidates, &by_digest, &CancellationToken::new())
        .await
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    let accept = calls[0].header_value("accept").unwrap();
    assert!(accept.contains("application/vnd.oci.image.manifest.v1+json"));
    assert!(accept.contains("application/vnd.docker.distribution.manifest.v2+json"));
}

#[tokio::test]
async fn test_verified_bytes() {
    let digest = DigestUtils::compute_docker_digest(b"hello world");
    let transport = Arc::new(
        MockTransport::default()
            .reply(
                &format!("http://mirror-a:5000/v2/myorg/app/blobs/{}", digest),
                Reply::Status(200, "hello world"),
            )
            .reply(
                &format!("http://mirror-a:5000/v2/myorg/app/blobs/{}", digest),
                Reply::Status(200, "tampered"),
            ),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000")]);
    let parsed = Digest::parse(&digest).unwrap();

    let good = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, &digest, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(good.into_verified_bytes(&parsed).await.unwrap(), Bytes::from_static(b"hello world"));

    let bad = fetcher(&transport)
        .fetch_blob(&app_reference(), &candidates, &digest, &CancellationToken::new())
        .await
        .unwrap();
    assert!(bad.into_verified_bytes(&parsed).await.is_err());
}

#[tokio::test]
async fn test_concurrent_fetches_share_transport() {
    let transport = Arc::new(
        MockTransport::default()
            .reply("http://mirror-a:5000/v2/myorg/app/blobs/sha256:aaa", Reply::Status(200, "a"))
            .reply("http://mirror-a:5000/v2/myorg/app/blobs/sha256:bbb", Reply::Status(200, "b")),
    );
    let candidates = CandidateList::from(vec![mirror("mirror-a:5000")]);
    let reference = app_reference();
    let fetcher = fetcher(&transport);
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        fetcher.fetch_blob(&reference, &candidates, "sha256:aaa", &cancel),
        fetcher.fetch_blob(&reference, &candidates, "sha256:bbb", &cancel),
    );

    assert_eq!(a.unwrap().into_bytes().await.unwrap(), Bytes::from_static(b"a"));
    assert_eq!(b.unwrap().into_bytes().await.unwrap(), Bytes::from_static(b"b"));
}
