//! Challenge Bypass Gateway (§4.3): returns HTML for anti-bot-protected URLs,
//! trying the Cookie Store's cookie-reuse fast path before invoking a
//! backend. A single active backend instance is shared process-wide behind
//! a serial lock (only one challenge solve in flight at a time).

mod backend;
mod cookies;

pub use backend::{Backend, BypassError, EmbeddedBackend, ExternalBackend, SolveOutcome, EXTERNAL_MAX_RETRY};
pub use cookies::{CookieStore, StoredCookie};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::cancel::CancelToken;
use crate::selector::MirrorRotator;

/// Base `RELEASE_INACTIVE_MIN`, in minutes (§4.3 supplement). Multiplied by 4
/// while any WebSocket client is connected.
pub const RELEASE_INACTIVE_MIN: u64 = 5;

/// Extracts the registrable base domain (scheme+host) used to key the
/// Cookie Store, e.g. `https://cdn.example.org/x` -> `example.org`.
pub fn base_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed.host_str().map(|h| h.to_string())
}

struct IdleState {
    last_used_unix: AtomicU64,
    connected_clients: AtomicU64,
    pending_restart: AtomicBool,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Owns the Cookie Store, the active backend, and the serial solve lock.
pub struct BypassGateway {
    cookies: Arc<CookieStore>,
    backend: Arc<dyn Backend>,
    serial_lock: AsyncMutex<()>,
    idle: IdleState,
    release_inactive_min: u64,
    selector: Option<Arc<dyn MirrorRotator>>,
}

impl BypassGateway {
    pub fn new(
        backend: Arc<dyn Backend>,
        cookies: Arc<CookieStore>,
        release_inactive_min: u64,
        selector: Option<Arc<dyn MirrorRotator>>,
    ) -> Self {
        Self {
            cookies,
            backend,
            serial_lock: AsyncMutex::new(()),
            idle: IdleState {
                last_used_unix: AtomicU64::new(now_unix()),
                connected_clients: AtomicU64::new(0),
                pending_restart: AtomicBool::new(false),
            },
            release_inactive_min,
            selector,
        }
    }

    /// Connection-count hook: call when the Broadcaster's active count
    /// transitions 0 -> 1.
    pub async fn on_first_connect(&self) {
        self.idle.connected_clients.fetch_add(1, Ordering::SeqCst);
        let _ = self.backend.warmup().await;
    }

    /// Connection-count hook: call when the Broadcaster's active count
    /// transitions N -> 0. Starts the idle countdown by simply leaving
    /// `last_used` where it is; the cleanup loop does the rest.
    pub fn shutdown_if_idle(&self) {
        self.idle.connected_clients.fetch_sub(1, Ordering::SeqCst);
    }

    /// The shared Cookie Store, for reuse by callers downstream of a bypass
    /// solve (§4.3: the binary download that follows `get` should carry
    /// whatever cookies the solver won, not a fresh empty jar).
    pub fn cookies(&self) -> Arc<CookieStore> {
        self.cookies.clone()
    }

    /// Called by the DNS layer's rotation callback (§4.2): flags that the
    /// embedded backend should restart on its next use.
    pub fn request_restart_after_dns_rotation(&self) {
        self.idle.pending_restart.store(true, Ordering::SeqCst);
    }

    fn idle_threshold(&self) -> Duration {
        let has_clients = self.idle.connected_clients.load(Ordering::SeqCst) > 0;
        let minutes = if has_clients {
            self.release_inactive_min * 4
        } else {
            self.release_inactive_min
        };
        Duration::from_secs(minutes * 60)
    }

    /// Background cleanup tick: tears the backend down if it has been idle
    /// past the threshold. Intended to be called in a loop by the scheduler
    /// runtime's cleanup task.
    pub async fn cleanup_tick(&self) {
        let elapsed = now_unix().saturating_sub(self.idle.last_used_unix.load(Ordering::SeqCst));
        if Duration::from_secs(elapsed) > self.idle_threshold() {
            self.backend.shutdown_if_idle().await;
        }
    }

    /// Returns HTML for `url`, trying the cookie-reuse fast path first.
    pub async fn get(&self, url: &str, cancel: CancelToken) -> Result<String, BypassError> {
        let _permit = self.serial_lock.lock().await;
        self.idle.last_used_unix.store(now_unix(), Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(BypassError::Cancelled);
        }

        if let Some(domain) = base_domain(url) {
            if let Some((stored_cookies, user_agent)) = self.cookies.get(&domain) {
                if let Ok(body) = plain_get_with_cookies(url, &stored_cookies, user_agent.as_deref()) {
                    info!(domain = %domain, "bypass: reused stored cookies, skipped solver");
                    return Ok(body);
                }
            }
        }

        let outcome = self.backend.get(url, &cancel).await?;
        if let Some(domain) = base_domain(url) {
            self.cookies.store(&domain, outcome.cookies, outcome.user_agent);
        }
        Ok(outcome.body)
    }
}

/// Plain HTTP GET using previously-stored cookies and user-agent. No bypass
/// solver invocation, no serial-lock contention beyond the caller's own.
fn plain_get_with_cookies(
    url: &str,
    cookies: &[(String, String)],
    user_agent: Option<&str>,
) -> Result<String, BypassError> {
    let mut body = Vec::new();
    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(|e| BypassError::Request(e.to_string()))?;
    easy.follow_location(true)
        .map_err(|e| BypassError::Request(e.to_string()))?;
    if let Some(ua) = user_agent {
        easy.useragent(ua).map_err(|e| BypassError::Request(e.to_string()))?;
    }
    if !cookies.is_empty() {
        let cookie_header = cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        easy.cookie(&cookie_header)
            .map_err(|e| BypassError::Request(e.to_string()))?;
    }
    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| BypassError::Request(e.to_string()))?;
        transfer.perform().map_err(|e| BypassError::Request(e.to_string()))?;
    }
    let code = easy.response_code().map_err(|e| BypassError::Request(e.to_string()))?;
    if code != 200 {
        return Err(BypassError::Request(format!("cookie-reuse GET returned {code}")));
    }
    String::from_utf8(body).map_err(|e| BypassError::Request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_domain_extracts_host() {
        assert_eq!(
            base_domain("https://cdn.example.org/a/b.html"),
            Some("cdn.example.org".to_string())
        );
    }

    #[test]
    fn base_domain_none_for_unparseable_url() {
        assert_eq!(base_domain("not a url"), None);
    }

    #[tokio::test]
    async fn idle_threshold_quadruples_with_connected_clients() {
        let cookies = Arc::new(CookieStore::new(Vec::new()));
        let backend: Arc<dyn Backend> = Arc::new(EmbeddedBackend::new(cookies.clone()));
        let gw = BypassGateway::new(backend, cookies, 5, None);
        let base = gw.idle_threshold();
        gw.on_first_connect().await;
        let with_client = gw.idle_threshold();
        assert_eq!(with_client, base * 4);
    }

    #[tokio::test]
    async fn get_with_cancelled_token_fails_fast() {
        let cookies = Arc::new(CookieStore::new(Vec::new()));
        let backend: Arc<dyn Backend> = Arc::new(EmbeddedBackend::new(cookies.clone()));
        let gw = BypassGateway::new(backend, cookies, 5, None);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = gw.get("https://example.org", cancel).await.unwrap_err();
        assert!(matches!(err, BypassError::Cancelled));
    }
}
