//! Failure taxonomy, timeouts and retry policy shared by the remote embedding and
//! generation services.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Why a call to a remote model service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFailure {
    /// Credential missing, invalid or not allowed to use the model (401/403).
    Auth,
    /// Quota or rate limit hit (429).
    RateLimited,
    /// Could not reach the service.
    Network,
    /// No response within the configured time limit.
    Timeout,
    /// Service-side error (5xx).
    Unavailable,
    /// Request refused for any other reason (other 4xx, unknown model, …).
    Rejected,
    /// Response arrived but did not have the expected shape.
    BadResponse,
}

impl ServiceFailure {
    /// Failures worth retrying for idempotent calls.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ServiceFailure::RateLimited
                | ServiceFailure::Network
                | ServiceFailure::Timeout
                | ServiceFailure::Unavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceFailure::Auth => "authentication failed",
            ServiceFailure::RateLimited => "rate limited",
            ServiceFailure::Network => "network error",
            ServiceFailure::Timeout => "timed out",
            ServiceFailure::Unavailable => "service unavailable",
            ServiceFailure::Rejected => "request rejected",
            ServiceFailure::BadResponse => "malformed response",
        }
    }

    /// Map an HTTP status code that is not a success.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ServiceFailure::Auth,
            429 => ServiceFailure::RateLimited,
            408 => ServiceFailure::Timeout,
            500..=599 => ServiceFailure::Unavailable,
            _ => ServiceFailure::Rejected,
        }
    }
}

/// Classify a failed HTTP exchange: timeouts first, then the status code if the server
/// answered, then undecodable bodies. Anything else never reached the server.
pub(crate) fn http_failure(e: &reqwest::Error) -> ServiceFailure {
    if e.is_timeout() {
        ServiceFailure::Timeout
    } else if let Some(status) = e.status() {
        ServiceFailure::from_status(status.as_u16())
    } else if e.is_decode() {
        ServiceFailure::BadResponse
    } else {
        ServiceFailure::Network
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to a remote service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceFailure,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ServiceFailure::Timeout
    }
}

/// Bounded exponential backoff for idempotent remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Run `call`, failing with [`ServiceFailure::Timeout`] if it takes longer than `limit`.
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    let Some(limit) = limit else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::new(
            ServiceFailure::Timeout,
            format!("no response within {:.1}s", limit.as_secs_f32()),
        )),
    }
}
