//! DNS Resolver Layer (§4.2): system, custom-UDP, and DoH resolution modes
//! with a failover trigger that asks the Selector to rotate providers.

mod providers;

pub use providers::{Provider, PROVIDERS};

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use hickory_resolver::config::{
    NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DnsMode;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("resolution failed for {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: hickory_resolver::error::ResolveError,
    },
    #[error("no providers configured")]
    NoProviders,
}

/// Callback invoked after a successful DNS rotation (e.g. the Bypass Gateway
/// restarting its controlled browser with new resolver rules, §4.3).
pub type RotationCallback = Arc<dyn Fn(&Provider) + Send + Sync>;

struct DnsState {
    provider_idx: usize,
    rotations: usize,
}

/// Resolves hostnames under the configured mode, rotating through the
/// built-in provider table on failure when in `Auto` mode.
pub struct DnsLayer {
    mode: DnsMode,
    manual_nameservers: Vec<String>,
    doh_enabled: bool,
    ipv4_preferred: Vec<String>,
    state: Mutex<DnsState>,
    callbacks: Mutex<Vec<RotationCallback>>,
}

impl DnsLayer {
    pub fn new(
        mode: DnsMode,
        manual_nameservers: Vec<String>,
        doh_enabled: bool,
        ipv4_preferred: Vec<String>,
    ) -> Self {
        Self {
            mode,
            manual_nameservers,
            doh_enabled,
            ipv4_preferred,
            state: Mutex::new(DnsState {
                provider_idx: 0,
                rotations: 0,
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback fired after each successful provider rotation.
    pub fn on_rotation(&self, cb: RotationCallback) {
        self.callbacks.lock().unwrap().push(cb);
    }

    fn current_provider(&self) -> Option<&'static Provider> {
        let idx = self.state.lock().unwrap().provider_idx;
        PROVIDERS.get(idx)
    }

    /// Resolves `host` to its IP addresses. Loopback, local, and literal IP
    /// inputs bypass any custom resolver entirely.
    pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        if host == "localhost" {
            return Ok(vec![IpAddr::from([127, 0, 0, 1])]);
        }

        let ipv4_only = self.ipv4_preferred.iter().any(|h| h == host);

        match self.mode {
            DnsMode::System => self.resolve_system(host, ipv4_only).await,
            DnsMode::Manual => self.resolve_custom(host, &self.manual_nameservers, ipv4_only).await,
            DnsMode::Cloudflare | DnsMode::Google | DnsMode::Quad9 | DnsMode::Opendns => {
                let provider = named_provider(self.mode).expect("named mode maps to a provider");
                self.resolve_via_provider(host, provider, ipv4_only).await
            }
            DnsMode::Auto => self.resolve_auto(host, ipv4_only).await,
        }
    }

    async fn resolve_auto(&self, host: &str, ipv4_only: bool) -> Result<Vec<IpAddr>, DnsError> {
        loop {
            let provider = match self.current_provider() {
                Some(p) => p,
                None => return self.resolve_system(host, ipv4_only).await,
            };
            match self.resolve_via_provider(host, provider, ipv4_only).await {
                Ok(addrs) => return Ok(addrs),
                Err(_) => {
                    if !self.rotate() {
                        warn!("dns: all providers exhausted, falling back to system resolver");
                        return self.resolve_system(host, ipv4_only).await;
                    }
                }
            }
        }
    }

    fn rotate(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.provider_idx + 1 >= PROVIDERS.len() {
            return false;
        }
        st.provider_idx += 1;
        st.rotations += 1;
        let provider = &PROVIDERS[st.provider_idx];
        info!(provider = provider.name, "dns: rotated provider");
        drop(st);
        for cb in self.callbacks.lock().unwrap().iter() {
            cb(provider);
        }
        true
    }

    async fn resolve_via_provider(
        &self,
        host: &str,
        provider: &Provider,
        ipv4_only: bool,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let resolver = if self.doh_enabled && provider.doh_endpoint.is_some() {
            self.build_doh_resolver(provider)
        } else {
            self.build_udp_resolver(provider.nameservers)
        };
        lookup(&resolver, host, ipv4_only).await
    }

    async fn resolve_custom(
        &self,
        host: &str,
        nameservers: &[String],
        ipv4_only: bool,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let ips: Vec<IpAddr> = nameservers.iter().filter_map(|s| s.parse().ok()).collect();
        if ips.is_empty() {
            return Err(DnsError::NoProviders);
        }
        let resolver = build_udp_resolver_from_ips(&ips);
        lookup(&resolver, host, ipv4_only).await
    }

    async fn resolve_system(&self, host: &str, ipv4_only: bool) -> Result<Vec<IpAddr>, DnsError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| DnsError::Lookup {
            host: host.to_string(),
            source: e,
        })?;
        lookup(&resolver, host, ipv4_only).await
    }

    fn build_udp_resolver(&self, nameservers: &[&str]) -> TokioAsyncResolver {
        let ips: Vec<IpAddr> = nameservers.iter().filter_map(|s| s.parse().ok()).collect();
        build_udp_resolver_from_ips(&ips)
    }

    /// The DoH endpoint's own hostname is resolved once via the system
    /// resolver and pinned to that IP, breaking the recursion.
    fn build_doh_resolver(&self, provider: &Provider) -> TokioAsyncResolver {
        let endpoint = provider.doh_endpoint.unwrap_or(provider.nameservers[0]);
        let ips: Vec<IpAddr> = provider.nameservers.iter().filter_map(|s| s.parse().ok()).collect();
        let group = NameServerConfigGroup::from_ips_https(&ips, 443, endpoint.to_string(), true);
        let cfg = ResolverConfig::from_parts(None, Vec::new(), group);
        TokioAsyncResolver::tokio(cfg, ResolverOpts::default())
    }
}

fn build_udp_resolver_from_ips(ips: &[IpAddr]) -> TokioAsyncResolver {
    let group = NameServerConfigGroup::from_ips_clear(ips, 53, true);
    let cfg = ResolverConfig::from_parts(None, Vec::new(), group);
    TokioAsyncResolver::tokio(cfg, ResolverOpts::default())
}

async fn lookup(
    resolver: &TokioAsyncResolver,
    host: &str,
    ipv4_only: bool,
) -> Result<Vec<IpAddr>, DnsError> {
    let response = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| DnsError::Lookup {
            host: host.to_string(),
            source: e,
        })?;
    let addrs: Vec<IpAddr> = response
        .iter()
        .filter(|ip| !ipv4_only || ip.is_ipv4())
        .collect();
    Ok(addrs)
}

fn named_provider(mode: DnsMode) -> Option<&'static Provider> {
    let name = match mode {
        DnsMode::Cloudflare => "cloudflare",
        DnsMode::Google => "google",
        DnsMode::Quad9 => "quad9",
        DnsMode::Opendns => "opendns",
        _ => return None,
    };
    PROVIDERS.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_provider_maps_known_modes() {
        assert!(named_provider(DnsMode::Cloudflare).is_some());
        assert!(named_provider(DnsMode::Google).is_some());
        assert!(named_provider(DnsMode::Quad9).is_some());
        assert!(named_provider(DnsMode::Opendns).is_some());
        assert!(named_provider(DnsMode::Auto).is_none());
    }

    #[test]
    fn opendns_has_no_doh_endpoint() {
        let p = named_provider(DnsMode::Opendns).unwrap();
        assert!(p.doh_endpoint.is_none());
    }

    #[tokio::test]
    async fn literal_ip_bypasses_resolver() {
        let layer = DnsLayer::new(DnsMode::System, Vec::new(), true, Vec::new());
        let addrs = layer.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec![IpAddr::from([127, 0, 0, 1])]);
    }

    #[tokio::test]
    async fn localhost_bypasses_resolver() {
        let layer = DnsLayer::new(DnsMode::System, Vec::new(), true, Vec::new());
        let addrs = layer.resolve("localhost").await.unwrap();
        assert_eq!(addrs, vec![IpAddr::from([127, 0, 0, 1])]);
    }

    #[test]
    fn manual_mode_with_no_nameservers_errors_synchronously() {
        let layer = DnsLayer::new(DnsMode::Manual, Vec::new(), false, Vec::new());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = rt.block_on(layer.resolve("example.com"));
        assert!(matches!(result, Err(DnsError::NoProviders)));
    }
}
