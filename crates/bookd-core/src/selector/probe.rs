//! Mirror reachability probing.

use std::time::Duration;

use super::PROBE_TIMEOUT;

/// Anything that can answer "is this mirror base reachable right now".
///
/// A plain `fn(&str) -> bool` or closure satisfies this, which keeps the
/// selector's tests free of real network access.
pub trait MirrorProbe: Send + Sync + 'static {
    fn probe(&self, base: &str) -> bool;
}

impl<F> MirrorProbe for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn probe(&self, base: &str) -> bool {
        self(base)
    }
}

/// Short-timeout GET used to confirm a mirror is reachable before committing
/// to it. Grounded on the HEAD-probe pattern used elsewhere in this crate's
/// network layer, but intentionally tolerant: any 2xx-5xx response counts as
/// "reachable" (we only want to rule out DNS/connect failures here).
pub fn curl_probe(base: &str) -> bool {
    let mut easy = curl::easy::Easy::new();
    if easy.url(base).is_err() {
        return false;
    }
    let _ = easy.nobody(true);
    let _ = easy.follow_location(true);
    let _ = easy.connect_timeout(PROBE_TIMEOUT);
    let _ = easy.timeout(Duration::from_secs(5));
    easy.perform().is_ok()
}
