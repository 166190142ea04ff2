//! Challenge Cookie Store (§3.5): `base_domain -> {cookie_name -> cookie}`
//! plus `base_domain -> user_agent`. Expired entries are removed on read.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct StoredCookie {
    pub value: String,
    /// Unix timestamp the cookie expires at; `None` means session-only
    /// (treated as non-expiring for the lifetime of this process).
    pub expires_at: Option<u64>,
}

impl StoredCookie {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

#[derive(Debug, Default)]
struct DomainEntry {
    cookies: HashMap<String, StoredCookie>,
    user_agent: Option<String>,
    /// Domains in the full-jar list store every cookie seen, not only the
    /// recognized challenge-cookie names.
    full_jar: bool,
}

/// Domains recorded with the full cookie jar rather than just the
/// recognized challenge cookies (`cf_clearance` and equivalents).
pub const CHALLENGE_COOKIE_NAMES: &[&str] = &["cf_clearance", "__cf_bm", "cf_chl_2"];

#[derive(Default)]
pub struct CookieStore {
    domains: Mutex<HashMap<String, DomainEntry>>,
    full_jar_domains: Vec<String>,
}

impl CookieStore {
    pub fn new(full_jar_domains: Vec<String>) -> Self {
        Self {
            domains: Mutex::new(HashMap::new()),
            full_jar_domains,
        }
    }

    /// Stores cookies observed for `base_domain`, filtering to recognized
    /// challenge-cookie names unless the domain is in the full-jar list.
    pub fn store(
        &self,
        base_domain: &str,
        cookies: Vec<(String, String, Option<u64>)>,
        user_agent: Option<String>,
    ) {
        let full_jar = self.full_jar_domains.iter().any(|d| d == base_domain);
        let mut domains = self.domains.lock().unwrap();
        let entry = domains.entry(base_domain.to_string()).or_default();
        entry.full_jar = full_jar;
        if let Some(ua) = user_agent {
            entry.user_agent = Some(ua);
        }
        for (name, value, expires_at) in cookies {
            if full_jar || CHALLENGE_COOKIE_NAMES.contains(&name.as_str()) {
                entry.cookies.insert(name, StoredCookie { value, expires_at });
            }
        }
    }

    /// Returns `(cookies, user_agent)` for `base_domain` if there are any
    /// unexpired entries, pruning expired ones as a side effect.
    pub fn get(&self, base_domain: &str) -> Option<(Vec<(String, String)>, Option<String>)> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut domains = self.domains.lock().unwrap();
        let entry = domains.get_mut(base_domain)?;
        entry.cookies.retain(|_, c| !c.is_expired(now));
        if entry.cookies.is_empty() {
            return None;
        }
        let cookies = entry
            .cookies
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        Some((cookies, entry.user_agent.clone()))
    }

    pub fn has_valid(&self, base_domain: &str) -> bool {
        self.get(base_domain).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_challenge_cookies() {
        let store = CookieStore::new(Vec::new());
        store.store(
            "example.org",
            vec![("cf_clearance".to_string(), "abc".to_string(), None)],
            Some("Mozilla/5.0".to_string()),
        );
        let (cookies, ua) = store.get("example.org").unwrap();
        assert_eq!(cookies, vec![("cf_clearance".to_string(), "abc".to_string())]);
        assert_eq!(ua.as_deref(), Some("Mozilla/5.0"));
    }

    #[test]
    fn ignores_non_challenge_cookies_by_default() {
        let store = CookieStore::new(Vec::new());
        store.store(
            "example.org",
            vec![("session_id".to_string(), "xyz".to_string(), None)],
            None,
        );
        assert!(store.get("example.org").is_none());
    }

    #[test]
    fn full_jar_domain_keeps_every_cookie() {
        let store = CookieStore::new(vec!["full.example".to_string()]);
        store.store(
            "full.example",
            vec![("session_id".to_string(), "xyz".to_string(), None)],
            None,
        );
        assert!(store.get("full.example").is_some());
    }

    #[test]
    fn expired_cookies_are_pruned_on_read() {
        let store = CookieStore::new(Vec::new());
        store.store(
            "example.org",
            vec![("cf_clearance".to_string(), "abc".to_string(), Some(0))],
            None,
        );
        assert!(store.get("example.org").is_none());
    }

    #[test]
    fn unknown_domain_returns_none() {
        let store = CookieStore::new(Vec::new());
        assert!(store.get("nowhere.example").is_none());
    }
}
