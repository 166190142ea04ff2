//! Shared application state (§6.1): the queue, registry, broadcaster, and
//! optional auth collaborator, plus the in-memory session table backing
//! `/api/auth/*`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bookd_core::auth::AuthService;
use bookd_core::broadcaster::Broadcaster;
use bookd_core::config::IngestConfig;
use bookd_core::queue::Queue;
use bookd_core::registry::{Release, SourceRegistry};

const SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const SESSION_TTL_REMEMBER_SECS: u64 = 30 * 24 * 60 * 60;

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Opaque-token session table. Not persisted: a restart logs everyone out,
/// same posture as the Queue and Mirror/DNS state (§3.2, §3.4).
#[derive(Default)]
pub struct SessionStore {
    tokens: Mutex<HashMap<String, u64>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, remember_me: bool) -> String {
        let token = {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            (0..32).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect::<String>()
        };
        let ttl = if remember_me { SESSION_TTL_REMEMBER_SECS } else { SESSION_TTL_SECS };
        self.tokens.lock().unwrap().insert(token.clone(), now() + ttl);
        token
    }

    pub fn is_valid(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        match tokens.get(token) {
            Some(expiry) if *expiry > now() => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.lock().unwrap().remove(token);
    }
}

/// Short-lived `source_id -> Release` lookup populated by `/api/search` and
/// consulted by `/api/info` and `/api/download` (§3.3: "cached briefly by
/// the source for later lookup" — here the API layer owns that cache since
/// `ReleaseSource` itself is a search-only trait).
#[derive(Default)]
pub struct ReleaseCache {
    inner: Mutex<HashMap<String, Release>>,
}

impl ReleaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_all(&self, releases: &[Release]) {
        let mut inner = self.inner.lock().unwrap();
        for r in releases {
            inner.insert(r.source_id.clone(), r.clone());
        }
    }

    pub fn get(&self, id: &str) -> Option<Release> {
        self.inner.lock().unwrap().get(id).cloned()
    }
}

pub struct AppState {
    pub queue: Arc<Queue>,
    pub registry: Arc<SourceRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub ingest: IngestConfig,
    pub auth: Option<Arc<AuthService>>,
    pub sessions: Arc<SessionStore>,
    pub releases: Arc<ReleaseCache>,
}

impl AppState {
    pub fn auth_required(&self) -> bool {
        self.auth.is_some()
    }
}
