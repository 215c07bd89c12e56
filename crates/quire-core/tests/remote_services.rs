//! Gemini and Ollama clients against a local stub server: status and error-body
//! classification, and which failures the embedder retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::Router;
use quire_core::gemini::GeminiClient;
use quire_core::ollama::OllamaClient;
use quire_core::{
    Embedder, EmbeddingService, GenerativeService, RetryPolicy, ServiceError, ServiceFailure,
};
use tokio::task::JoinHandle;

const GEMINI_INVALID_KEY: &str = r#"{
  "error": {
    "code": 400,
    "message": "API key not valid. Please pass a valid API key.",
    "status": "INVALID_ARGUMENT",
    "details": [
      {
        "@type": "type.googleapis.com/google.rpc.ErrorInfo",
        "reason": "API_KEY_INVALID",
        "domain": "googleapis.com",
        "metadata": { "service": "generativelanguage.googleapis.com" }
      }
    ]
  }
}"#;

/// Requests seen by the stub: path and `x-goog-api-key` header.
#[derive(Default)]
struct Seen {
    hits: AtomicUsize,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl Seen {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Serves one fixed response for every request.
async fn spawn_stub(status: StatusCode, body: &'static str) -> (String, Arc<Seen>, JoinHandle<()>) {
    let seen = Arc::new(Seen::default());
    let recorder = seen.clone();
    let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap| {
        let recorder = recorder.clone();
        async move {
            recorder.hits.fetch_add(1, Ordering::SeqCst);
            let key = headers
                .get("x-goog-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            recorder
                .requests
                .lock()
                .unwrap()
                .push((uri.path().to_string(), key));
            (status, [(header::CONTENT_TYPE, "application/json")], body)
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server");
    });
    (format!("http://{addr}"), seen, handle)
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

fn gemini(base: &str) -> GeminiClient {
    GeminiClient::new("test-key").with_base_url(format!("{base}/v1beta"))
}

async fn gemini_embed_error(status: StatusCode, body: &'static str) -> (ServiceError, usize) {
    let (base, seen, handle) = spawn_stub(status, body).await;
    let err = gemini(&base)
        .embed(&["hello".to_string()], "models/embedding-001")
        .await
        .unwrap_err();
    handle.abort();
    (err, seen.hits())
}

#[tokio::test]
async fn ollama_unknown_model_is_rejected_without_retry() {
    let (base, seen, handle) =
        spawn_stub(StatusCode::NOT_FOUND, r#"{"error":"model \"nope\" not found"}"#).await;
    let client = OllamaClient::from_url(&base).unwrap();
    let embedder = Embedder::new(Arc::new(client), "nope").with_retry(quick_retry());

    let err = embedder.embed_many(&["hello".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ServiceFailure::Rejected);
    assert_eq!(err.attempts, 1);
    assert_eq!(seen.hits(), 1);
    handle.abort();
}

#[tokio::test]
async fn ollama_unreachable_is_a_retried_network_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = OllamaClient::from_url(&format!("http://{addr}")).unwrap();
    let embedder = Embedder::new(Arc::new(client), "nomic-embed-text").with_retry(quick_retry());
    let err = embedder.embed_many(&["hello".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ServiceFailure::Network);
    assert_eq!(err.attempts, 4);
}

#[tokio::test]
async fn gemini_invalid_key_is_an_auth_failure() {
    let (base, seen, handle) = spawn_stub(StatusCode::BAD_REQUEST, GEMINI_INVALID_KEY).await;
    let embedder = Embedder::new(Arc::new(gemini(&base)), "models/embedding-001")
        .with_retry(quick_retry());

    let err = embedder.embed_many(&["hello".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ServiceFailure::Auth);
    assert!(err.to_string().contains("API key not valid"));
    assert_eq!(seen.hits(), 1);

    let requests = seen.requests.lock().unwrap().clone();
    assert_eq!(
        requests[0],
        (
            "/v1beta/models/embedding-001:batchEmbedContents".to_string(),
            Some("test-key".to_string())
        )
    );
    handle.abort();
}

#[tokio::test]
async fn gemini_status_codes_map_to_failures() {
    let cases = [
        (StatusCode::UNAUTHORIZED, ServiceFailure::Auth),
        (StatusCode::TOO_MANY_REQUESTS, ServiceFailure::RateLimited),
        (StatusCode::SERVICE_UNAVAILABLE, ServiceFailure::Unavailable),
        (StatusCode::NOT_FOUND, ServiceFailure::Rejected),
    ];
    for (status, expected) in cases {
        let (err, hits) = gemini_embed_error(status, r#"{"error":{"message":"nope"}}"#).await;
        assert_eq!(err.kind, expected, "status {status}");
        assert!(err.message.contains("nope"));
        assert_eq!(hits, 1);
    }
}

#[tokio::test]
async fn gemini_quota_exhaustion_is_retried() {
    let (base, seen, handle) = spawn_stub(
        StatusCode::TOO_MANY_REQUESTS,
        r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#,
    )
    .await;
    let embedder = Embedder::new(Arc::new(gemini(&base)), "models/embedding-001")
        .with_retry(quick_retry());
    let err = embedder.embed_many(&["hello".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ServiceFailure::RateLimited);
    assert_eq!(err.attempts, 4);
    assert_eq!(seen.hits(), 4);
    handle.abort();
}

#[tokio::test]
async fn gemini_unparseable_success_is_a_bad_response() {
    let (err, hits) = gemini_embed_error(StatusCode::OK, "<html>proxy login</html>").await;
    assert_eq!(err.kind, ServiceFailure::BadResponse);
    assert_eq!(hits, 1);
}

#[tokio::test]
async fn gemini_round_trips_embeddings_and_answers() {
    let (base, _, handle) = spawn_stub(
        StatusCode::OK,
        r#"{"embeddings":[{"values":[0.1,0.2]},{"values":[0.3,0.4]}]}"#,
    )
    .await;
    let vectors = gemini(&base)
        .embed(&["a".to_string(), "b".to_string()], "embedding-001")
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    handle.abort();

    let (base, seen, handle) = spawn_stub(
        StatusCode::OK,
        r#"{"candidates":[{"content":{"parts":[{"text":" K35.80\n"}]}}]}"#,
    )
    .await;
    let text = gemini(&base)
        .generate("prompt", "gemini-1.0-pro", 0.2)
        .await
        .unwrap();
    assert_eq!(text, " K35.80\n");
    assert_eq!(
        seen.requests.lock().unwrap()[0].0,
        "/v1beta/models/gemini-1.0-pro:generateContent"
    );
    handle.abort();
}
