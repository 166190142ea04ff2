//! Network Selector (§4.1): tracks which mirror is currently in use and
//! advances it deterministically on failure, rotating DNS providers once a
//! full round of mirrors has been exhausted.

mod probe;

pub use probe::{curl_probe, MirrorProbe};

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("no mirrors configured")]
    NoMirrors,
}

/// Object-safe view of a `Selector`, so callers that don't care about the
/// concrete probe type (the Bypass Gateway, the Fetcher) can hold
/// `Arc<dyn MirrorRotator>`.
pub trait MirrorRotator: Send + Sync {
    fn get_base(&self) -> String;
    fn rewrite(&self, url: &str) -> String;
    fn next_mirror_or_rotate_dns(&self, allow_dns: bool) -> (String, RotationAction);
}

impl<P: MirrorProbe> MirrorRotator for Selector<P> {
    fn get_base(&self) -> String {
        Selector::get_base(self)
    }
    fn rewrite(&self, url: &str) -> String {
        Selector::rewrite(self, url)
    }
    fn next_mirror_or_rotate_dns(&self, allow_dns: bool) -> (String, RotationAction) {
        Selector::next_mirror_or_rotate_dns(self, allow_dns)
    }
}

/// Outcome of `next_mirror_or_rotate_dns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    /// Advanced to the next mirror within the current DNS provider.
    Mirror,
    /// All mirrors for the current DNS provider were tried; DNS rotated and
    /// the mirror index reset.
    Dns,
    /// Mirrors and DNS providers are both exhausted; no further rotation.
    Exhausted,
}

struct SelectorState {
    current_idx: Option<usize>,
    tried_this_round: Vec<bool>,
    dns_rotations: usize,
    exhausted: bool,
}

/// Rotates across a fixed list of interchangeable mirror base URLs, asking
/// the DNS layer to rotate providers once a full round is exhausted.
///
/// `get_base` is idempotent between rotations: concurrent callers see either
/// the pre- or post-rotation value, never a partial update, because all
/// mutation happens under a single mutex held for the duration of the
/// rotation decision.
pub struct Selector<P: MirrorProbe = fn(&str) -> bool> {
    mirrors: Vec<String>,
    max_dns_rotations: usize,
    probe: P,
    state: Mutex<SelectorState>,
}

impl Selector<fn(&str) -> bool> {
    /// Builds a selector using the real curl-based reachability probe.
    pub fn new(mirrors: Vec<String>, max_dns_rotations: usize) -> Result<Self, SelectorError> {
        Self::with_probe(mirrors, max_dns_rotations, curl_probe)
    }
}

impl<P: MirrorProbe> Selector<P> {
    pub fn with_probe(
        mirrors: Vec<String>,
        max_dns_rotations: usize,
        probe: P,
    ) -> Result<Self, SelectorError> {
        if mirrors.is_empty() {
            return Err(SelectorError::NoMirrors);
        }
        let n = mirrors.len();
        Ok(Self {
            mirrors,
            max_dns_rotations,
            probe,
            state: Mutex::new(SelectorState {
                current_idx: None,
                tried_this_round: vec![false; n],
                dns_rotations: 0,
                exhausted: false,
            }),
        })
    }

    /// Current mirror base URL. Picks the first reachable mirror on first
    /// use; afterwards returns the same value until rotated.
    pub fn get_base(&self) -> String {
        let mut st = self.state.lock().unwrap();
        if let Some(idx) = st.current_idx {
            return self.mirrors[idx].clone();
        }
        let chosen = self
            .mirrors
            .iter()
            .position(|m| (self.probe)(m))
            .unwrap_or(0);
        st.current_idx = Some(chosen);
        st.tried_this_round[chosen] = true;
        debug!(mirror = %self.mirrors[chosen], "selector: initial mirror chosen");
        self.mirrors[chosen].clone()
    }

    /// Rewrites `url` to use the current mirror base if it starts with any
    /// known mirror prefix; otherwise returns it unchanged. Idempotent.
    pub fn rewrite(&self, url: &str) -> String {
        let base = self.get_base();
        for mirror in &self.mirrors {
            if let Some(rest) = url.strip_prefix(mirror.as_str()) {
                return format!("{base}{rest}");
            }
        }
        url.to_string()
    }

    /// Advances to the next mirror, rotating DNS once the current round is
    /// exhausted. `allow_dns = false` disables the DNS-rotation step: once
    /// mirrors run out, returns `Exhausted` instead.
    pub fn next_mirror_or_rotate_dns(&self, allow_dns: bool) -> (String, RotationAction) {
        let mut st = self.state.lock().unwrap();
        if st.exhausted {
            let idx = st.current_idx.unwrap_or(0);
            return (self.mirrors[idx].clone(), RotationAction::Exhausted);
        }

        let n = self.mirrors.len();
        let start = st.current_idx.unwrap_or(0);
        let untried = (1..=n)
            .map(|step| (start + step) % n)
            .find(|idx| !st.tried_this_round[*idx]);

        if let Some(next_idx) = untried {
            st.current_idx = Some(next_idx);
            st.tried_this_round[next_idx] = true;
            debug!(mirror = %self.mirrors[next_idx], "selector: rotated mirror");
            return (self.mirrors[next_idx].clone(), RotationAction::Mirror);
        }

        if !allow_dns || st.dns_rotations >= self.max_dns_rotations {
            st.exhausted = true;
            warn!("selector: mirrors and dns providers exhausted");
            let idx = st.current_idx.unwrap_or(0);
            return (self.mirrors[idx].clone(), RotationAction::Exhausted);
        }

        st.dns_rotations += 1;
        st.tried_this_round = vec![false; n];
        st.current_idx = Some(start);
        st.tried_this_round[start] = true;
        info!(rotation = st.dns_rotations, "selector: rotated dns provider");
        (self.mirrors[start].clone(), RotationAction::Dns)
    }
}

/// Short-timeout reachability probe used before committing to a mirror.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;

    fn mirrors() -> Vec<String> {
        vec![
            "https://a.example".into(),
            "https://b.example".into(),
            "https://c.example".into(),
        ]
    }

    #[test]
    fn get_base_is_stable_until_rotated() {
        let sel = Selector::with_probe(mirrors(), 1, |_| true).unwrap();
        let first = sel.get_base();
        let second = sel.get_base();
        assert_eq!(first, second);
    }

    #[test]
    fn rewrite_replaces_known_mirror_prefix() {
        let sel = Selector::with_probe(mirrors(), 1, |m| m == "https://a.example").unwrap();
        let base = sel.get_base();
        assert_eq!(base, "https://a.example");
        let rewritten = sel.rewrite("https://b.example/path/file.zip");
        assert_eq!(rewritten, "https://a.example/path/file.zip");
    }

    #[test]
    fn rewrite_is_idempotent() {
        let sel = Selector::with_probe(mirrors(), 1, |_| true).unwrap();
        let once = sel.rewrite("https://a.example/x");
        let twice = sel.rewrite(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn rewrite_unknown_prefix_passes_through() {
        let sel = Selector::with_probe(mirrors(), 1, |_| true).unwrap();
        let url = "https://unrelated.example/x";
        assert_eq!(sel.rewrite(url), url);
    }

    #[test]
    fn rotation_cycles_mirrors_then_rotates_dns() {
        let sel = Selector::with_probe(mirrors(), 2, |_| true).unwrap();
        sel.get_base();
        let (_, a1) = sel.next_mirror_or_rotate_dns(true);
        let (_, a2) = sel.next_mirror_or_rotate_dns(true);
        assert_eq!(a1, RotationAction::Mirror);
        assert_eq!(a2, RotationAction::Mirror);
        let (_, a3) = sel.next_mirror_or_rotate_dns(true);
        assert_eq!(a3, RotationAction::Dns);
    }

    #[test]
    fn exhausted_after_dns_rotations_used_up() {
        let sel = Selector::with_probe(mirrors(), 0, |_| true).unwrap();
        sel.get_base();
        sel.next_mirror_or_rotate_dns(true);
        sel.next_mirror_or_rotate_dns(true);
        let (_, action) = sel.next_mirror_or_rotate_dns(true);
        assert_eq!(action, RotationAction::Exhausted);
        let (_, action2) = sel.next_mirror_or_rotate_dns(true);
        assert_eq!(action2, RotationAction::Exhausted);
    }

    #[test]
    fn allow_dns_false_exhausts_after_mirrors() {
        let sel = Selector::with_probe(mirrors(), 5, |_| true).unwrap();
        sel.get_base();
        sel.next_mirror_or_rotate_dns(false);
        sel.next_mirror_or_rotate_dns(false);
        let (_, action) = sel.next_mirror_or_rotate_dns(false);
        assert_eq!(action, RotationAction::Exhausted);
    }

    #[test]
    fn empty_mirror_list_errors() {
        let err = Selector::with_probe(Vec::new(), 1, |_| true).unwrap_err();
        assert!(matches!(err, SelectorError::NoMirrors));
    }
}
