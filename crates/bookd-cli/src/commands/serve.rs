//! `bookd serve` — assembles every collaborator (§4: queue, registry,
//! scheduler, selector, DNS layer, bypass gateway, broadcaster, optional
//! auth) and serves the HTTP/WebSocket surface (§6).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use bookd_core::auth::AuthService;
use bookd_core::bypass::{BypassGateway, CookieStore, EmbeddedBackend, ExternalBackend};
use bookd_core::broadcaster::Broadcaster;
use bookd_core::cascade::Cascade;
use bookd_core::config::{AppConfig, BypassBackendKind};
use bookd_core::dns::{DnsLayer, PROVIDERS};
use bookd_core::queue::Queue;
use bookd_core::registry::SourceRegistry;
use bookd_core::scheduler::Scheduler;
use bookd_core::search::AaSearchSource;
use bookd_core::selector::{MirrorRotator, Selector};

use crate::sources::{build_resolver, default_sources};

/// Fallback mirror list (§4.1) used when no mirrors are configured: the
/// well-known Anna's Archive domain aliases this ecosystem rotates through.
const DEFAULT_MIRRORS: &[&str] = &[
    "https://annas-archive.org",
    "https://annas-archive.se",
    "https://annas-archive.li",
];

pub async fn run(bind: &str, cfg: AppConfig) -> Result<()> {
    let mut mirrors = cfg.network.mirrors.clone();
    mirrors.extend(cfg.network.extra_mirrors.clone());
    if mirrors.is_empty() {
        mirrors = DEFAULT_MIRRORS.iter().map(|s| s.to_string()).collect();
    }
    let selector: Arc<dyn MirrorRotator> =
        Arc::new(Selector::new(mirrors, PROVIDERS.len()).context("building mirror selector")?);

    let dns = Arc::new(DnsLayer::new(
        cfg.dns.mode,
        cfg.dns.manual_nameservers.clone(),
        cfg.dns.doh_enabled,
        Vec::new(),
    ));

    let backend: Arc<dyn bookd_core::bypass::Backend> = match cfg.bypass.backend {
        BypassBackendKind::External => {
            let endpoint = cfg
                .bypass
                .external_endpoint
                .clone()
                .context("bypass.external_endpoint must be set when backend = \"external\"")?;
            Arc::new(ExternalBackend::new(endpoint, 30_000))
        }
        BypassBackendKind::Embedded => Arc::new(EmbeddedBackend::new(Arc::new(CookieStore::default()))),
    };
    let bypass = Arc::new(BypassGateway::new(
        backend,
        Arc::new(CookieStore::new(Vec::new())),
        cfg.bypass.release_inactive_min,
        Some(Arc::clone(&selector)),
    ));

    // DNS rotation forces the embedded bypass backend to restart so its
    // pinned resolver rules don't keep using the provider we just left
    // (Open Question #1).
    let bypass_for_rotation = Arc::clone(&bypass);
    dns.on_rotation(Arc::new(move |provider| {
        info!(provider = provider.name, "dns: rotated, flagging bypass backend for restart");
        bypass_for_rotation.request_restart_after_dns_rotation();
    }));

    // A `BypassGateway` is always constructed, so Cloudflare-bypass sources
    // are always eligible to run; `CascadeSource::requires_bypass` is what
    // actually gates a given source on it per-attempt.
    let bypass_enabled = true;
    let cascade = Cascade::new(
        default_sources(),
        build_resolver(cfg.bypass.donor_key.clone()),
        Vec::new(),
        bypass_enabled,
        Arc::clone(&selector),
        Arc::clone(&bypass),
        Some(Arc::clone(&dns)),
    );

    let mut registry = SourceRegistry::new();
    registry
        .register_download_handler(Arc::new(cascade))
        .context("registering direct-download cascade")?;
    registry
        .register_release_source(Arc::new(AaSearchSource::new(
            "https://annas-archive.org",
            Arc::clone(&selector),
            Arc::clone(&bypass),
            bypass_enabled,
            Some(Arc::clone(&dns)),
        )))
        .context("registering aa-catalog release source")?;
    let registry = Arc::new(registry);

    let queue = Arc::new(Queue::new());
    let broadcaster = Arc::new(Broadcaster::new());

    let bypass_for_connect = Arc::clone(&bypass);
    broadcaster
        .set_first_connect_hook(Arc::new(move || {
            let bypass = Arc::clone(&bypass_for_connect);
            tokio::spawn(async move { bypass.on_first_connect().await });
        }))
        .await;
    let bypass_for_disconnect = Arc::clone(&bypass);
    broadcaster.set_all_disconnect_hook(Arc::new(move || bypass_for_disconnect.shutdown_if_idle())).await;

    let auth = match &cfg.auth.auth_db_path {
        Some(path) => Some(Arc::new(
            AuthService::open(path, cfg.auth.max_login_attempts, cfg.auth.lockout_duration_minutes)
                .await
                .context("opening auth database")?,
        )),
        None => None,
    };

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
        cfg.scheduler.clone(),
        cfg.ingest.clone(),
    ));
    tokio::spawn(scheduler.run());

    let bypass_cleanup = Arc::clone(&bypass);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            bypass_cleanup.cleanup_tick().await;
        }
    });

    let state = Arc::new(bookd_api::AppState {
        queue,
        registry,
        broadcaster,
        ingest: cfg.ingest.clone(),
        auth,
        sessions: Arc::new(bookd_api::SessionStore::new()),
        releases: Arc::new(bookd_api::ReleaseCache::new()),
    });

    let listener = tokio::net::TcpListener::bind(bind).await.with_context(|| format!("binding {bind}"))?;
    info!(bind, "bookd: listening");
    axum::serve(listener, bookd_api::router(state)).await.context("serving http")?;
    Ok(())
}
