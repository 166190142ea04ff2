//! Backend trait (§9 redesign: "Per-bypass-backend globals" collapsed into an
//! interface with one implementation per backend) and the two concrete
//! implementations, External and Embedded.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::retry::{run_with_retry, FetchError, RetryPolicy};

use super::cookies::CookieStore;

/// Retry bound for the external backend specifically, distinct from the
/// fetcher's general `MAX_RETRY = 10` (§4.3 supplement).
pub const EXTERNAL_MAX_RETRY: u32 = 5;

#[derive(Debug, Serialize)]
struct ExternalRequest<'a> {
    cmd: &'a str,
    url: &'a str,
    #[serde(rename = "maxTimeout")]
    max_timeout: u64,
}

#[derive(Debug, Deserialize)]
struct ExternalResponse {
    status: String,
    solution: Option<ExternalSolution>,
}

#[derive(Debug, Deserialize)]
struct ExternalSolution {
    response: String,
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
    cookies: Option<Vec<ExternalCookie>>,
}

#[derive(Debug, Deserialize)]
struct ExternalCookie {
    name: String,
    value: String,
    expires: Option<u64>,
}

/// Result of a successful challenge solve: the page body plus whatever the
/// backend wants persisted into the Cookie Store.
pub struct SolveOutcome {
    pub body: String,
    pub user_agent: Option<String>,
    pub cookies: Vec<(String, String, Option<u64>)>,
}

#[derive(Debug, thiserror::Error)]
pub enum BypassError {
    #[error("request cancelled")]
    Cancelled,
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend returned no solution")]
    NoSolution,
}

/// One implementation per anti-bot backend. Lifecycle methods are mandatory
/// so the idle-cleanup loop can run against whichever backend is active
/// without knowing its concrete type.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Idempotently spins up the backend. Embedded-only in practice;
    /// External is a no-op.
    async fn warmup(&self) -> Result<(), BypassError>;

    async fn get(&self, url: &str, cancel: &CancelToken) -> Result<SolveOutcome, BypassError>;

    /// Tears down backend resources if idle. Called by the cleanup loop.
    async fn shutdown_if_idle(&self);
}

/// POSTs `{cmd, url, maxTimeout}` to an HTTP endpoint and expects
/// `{status, solution:{response}}` back.
pub struct ExternalBackend {
    endpoint: String,
    timeout: Duration,
}

impl ExternalBackend {
    pub fn new(endpoint: String, timeout_ms: u64) -> Self {
        Self {
            endpoint,
            // read timeout = min(timeout_ms/1000 + 15, 120)s, per §5.
            timeout: Duration::from_secs(((timeout_ms / 1000) + 15).min(120)),
        }
    }

    fn request_once(&self, url: &str) -> Result<ExternalResponse, FetchError> {
        let body = serde_json::to_vec(&ExternalRequest {
            cmd: "request.get",
            url,
            max_timeout: self.timeout.as_millis() as u64,
        })
        .map_err(|e| FetchError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut response_buf = Vec::new();
        let mut easy = curl::easy::Easy::new();
        easy.url(&self.endpoint)?;
        easy.post(true)?;
        easy.post_fields_copy(&body)?;
        easy.connect_timeout(Duration::from_secs(10))?;
        easy.timeout(self.timeout)?;
        let mut list = curl::easy::List::new();
        list.append("Content-Type: application/json")?;
        easy.http_headers(list)?;
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                response_buf.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }
        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(FetchError::Http(code));
        }
        serde_json::from_slice(&response_buf)
            .map_err(|e| FetchError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

#[async_trait]
impl Backend for ExternalBackend {
    async fn warmup(&self) -> Result<(), BypassError> {
        Ok(())
    }

    async fn get(&self, url: &str, cancel: &CancelToken) -> Result<SolveOutcome, BypassError> {
        if cancel.is_cancelled() {
            return Err(BypassError::Cancelled);
        }
        let url = url.to_string();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let backend = ExternalBackend { endpoint, timeout };

        let response = tokio::task::spawn_blocking(move || {
            let policy = RetryPolicy {
                max_attempts: EXTERNAL_MAX_RETRY,
                ..RetryPolicy::default()
            };
            run_with_retry(&policy, || match backend.request_once(&url) {
                Ok(resp) => Ok(resp),
                Err(e) => {
                    warn!(error = %e, "external bypass attempt failed, retrying");
                    Err(e)
                }
            })
        })
        .await
        .map_err(|e| BypassError::Request(e.to_string()))?
        .map_err(|e: FetchError| BypassError::Request(e.to_string()))?;

        if response.status != "ok" {
            return Err(BypassError::Request(response.status));
        }
        let solution = response.solution.ok_or(BypassError::NoSolution)?;
        let cookies = solution
            .cookies
            .unwrap_or_default()
            .into_iter()
            .map(|c| (c.name, c.value, c.expires))
            .collect();

        Ok(SolveOutcome {
            body: solution.response,
            user_agent: solution.user_agent,
            cookies,
        })
    }

    async fn shutdown_if_idle(&self) {}
}

/// Models the embedded (browser-driven) backend's public contract faithfully;
/// its solve loop is a deliberately narrow stand-in since driving a real
/// browser process is out of scope for this workspace (see DESIGN.md).
pub struct EmbeddedBackend {
    cookies: std::sync::Arc<CookieStore>,
}

impl EmbeddedBackend {
    pub fn new(cookies: std::sync::Arc<CookieStore>) -> Self {
        Self { cookies }
    }
}

#[async_trait]
impl Backend for EmbeddedBackend {
    async fn warmup(&self) -> Result<(), BypassError> {
        info!("embedded bypass backend: warmup (stand-in, no browser process started)");
        Ok(())
    }

    async fn get(&self, url: &str, cancel: &CancelToken) -> Result<SolveOutcome, BypassError> {
        if cancel.is_cancelled() {
            return Err(BypassError::Cancelled);
        }
        let domain = crate::bypass::base_domain(url).ok_or_else(|| {
            BypassError::Request("url has no host to key the cookie jar on".to_string())
        })?;
        if let Some((_, ua)) = self.cookies.get(&domain) {
            return Err(BypassError::Request(format!(
                "embedded backend has no browser automation available; reused cookies for {domain} should have short-circuited this call (ua={ua:?})"
            )));
        }
        Err(BypassError::Request(
            "embedded backend cannot solve challenges without a browser-automation dependency"
                .to_string(),
        ))
    }

    async fn shutdown_if_idle(&self) {}
}
