//! Google Gemini (Generative Language API) client for embeddings and completion.
//!
//! Talks to the REST endpoints with `reqwest`; the API key is passed in by the caller and
//! sent in the `x-goog-api-key` header.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::answer::GenerativeService;
use crate::embed::{Embedding, EmbeddingService};
use crate::remote::{http_failure, ServiceError, ServiceFailure};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBED_MODEL: &str = "models/embedding-001";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.0-pro";
/// Environment variable read for the API key unless configured otherwise.
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Client for the Gemini REST API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Point at a different endpoint (proxy, regional host, …).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, model_path(model), method)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ServiceError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<ErrorResponse>(&body).ok();
            let kind = api_failure(status.as_u16(), parsed.as_ref().map(|e| &e.error));
            let detail = parsed.map(|e| e.error.message).unwrap_or(body);
            error!(provider = "Gemini", %status, %kind, "API error");
            return Err(ServiceError::new(
                kind,
                format!("API returned {status}: {detail}"),
            ));
        }

        response.json::<R>().await.map_err(|e| {
            ServiceError::new(
                ServiceFailure::BadResponse,
                format!("failed to parse response: {e}"),
            )
        })
    }
}

/// Gemini addresses models as `models/<name>`; accept both forms.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::new(http_failure(&e), format!("request failed: {e}"))
}

/// Gemini reports a bad API key as 400 INVALID_ARGUMENT, so the status code alone
/// is not enough. The google.rpc status and ErrorInfo reasons take precedence.
fn api_failure(status: u16, detail: Option<&ErrorDetail>) -> ServiceFailure {
    let Some(detail) = detail else {
        return ServiceFailure::from_status(status);
    };
    let codes = detail
        .status
        .iter()
        .chain(detail.details.iter().filter_map(|d| d.reason.as_ref()));
    for code in codes {
        match code.as_str() {
            "API_KEY_INVALID" | "UNAUTHENTICATED" | "PERMISSION_DENIED" => {
                return ServiceFailure::Auth
            }
            "RESOURCE_EXHAUSTED" => return ServiceFailure::RateLimited,
            _ => {}
        }
    }
    ServiceFailure::from_status(status)
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    /// google.rpc.Code name, e.g. `INVALID_ARGUMENT`.
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorInfo>,
}

#[derive(Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    reason: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate; empty when the model returned nothing.
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

// ── Service implementations ────────────────────────────────────────

#[async_trait]
impl EmbeddingService for GeminiClient {
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Embedding>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = "Gemini", batch_size = texts.len(), model, "embedding batch");
        let model_name = model_path(model);
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: model_name.clone(),
                    content: Content {
                        parts: vec![Part {
                            text: text.as_str(),
                        }],
                    },
                })
                .collect(),
        };
        let response: BatchEmbedResponse = self
            .post(&self.endpoint(model, "batchEmbedContents"), &body)
            .await?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl GenerativeService for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<String, ServiceError> {
        debug!(provider = "Gemini", model, prompt_len = prompt.len(), "generating");
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature },
        };
        let response: GenerateResponse = self
            .post(&self.endpoint(model, "generateContent"), &body)
            .await?;
        Ok(response.into_text())
    }
}
