//! Source Cascade (§4.6): the direct-download handler. Downloads a single
//! task by traversing enabled sources in priority order until one succeeds
//! or all fail.

mod page;

pub use page::{anchor_texts_for_debug, PageLink, MAX_COUNTDOWN_SECS};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bypass::BypassGateway;
use crate::cancel::CancelToken;
use crate::dns::DnsLayer;
use crate::fetcher::{self, FetchContext, FetcherError, ProgressCb, StatusCb};
use crate::queue::Task;
use crate::registry::{DownloadHandler, RegistryError};
use crate::selector::MirrorRotator;

/// A source is disabled for the remainder of a cascade run once its failure
/// count reaches this bound.
pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Derives one URL from the task's content hash.
    UrlTemplate,
    /// Requires fetching the primary catalog page and enumerating mirror
    /// links tagged `no-wait`/`waitlist`.
    AaPage,
    /// Requires a challenge-bypass fetch of another site's page.
    ExternalPage,
}

#[derive(Debug, Clone)]
pub struct CascadeSource {
    pub name: String,
    pub display_name: String,
    pub priority: u32,
    pub kind: SourceKind,
    pub requires_bypass: bool,
    pub enabled: bool,
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("request cancelled")]
    Cancelled,
    #[error("all sources failed")]
    AllSourcesFailed,
    #[error("fetch error: {0}")]
    Fetch(#[from] FetcherError),
}

/// Resolves candidate URLs for a source given the task's content hash and
/// the source's own id. The id disambiguates sources that share a `kind`
/// but derive URLs differently (e.g. `zlib`/`libgen`/`welib` are all
/// `UrlTemplate` but each substitutes the hash into a different host). In
/// the teacher/pack idiom this would be a trait with per-source
/// implementations; kept as a plain function pointer here since URL
/// derivation has no per-source state beyond the hash, id and kind.
pub type UrlResolver = Arc<dyn Fn(&str, &str, SourceKind) -> Vec<String> + Send + Sync>;

pub struct Cascade {
    sources: Vec<CascadeSource>,
    resolve_urls: UrlResolver,
    debug_skip: Vec<String>,
    round_robin: AtomicU64,
    bypass_enabled: bool,
    selector: Arc<dyn MirrorRotator>,
    bypass: Arc<BypassGateway>,
    dns: Option<Arc<DnsLayer>>,
}

impl Cascade {
    pub fn new(
        mut sources: Vec<CascadeSource>,
        resolve_urls: UrlResolver,
        debug_skip: Vec<String>,
        bypass_enabled: bool,
        selector: Arc<dyn MirrorRotator>,
        bypass: Arc<BypassGateway>,
        dns: Option<Arc<DnsLayer>>,
    ) -> Self {
        sources.sort_by_key(|s| s.priority);
        Self {
            sources,
            resolve_urls,
            debug_skip,
            round_robin: AtomicU64::new(0),
            bypass_enabled,
            selector,
            bypass,
            dns,
        }
    }

    /// Downloads `content_hash`, traversing sources in priority order.
    /// Returns the temp path of the downloaded file on success.
    async fn download_content(
        &self,
        content_hash: &str,
        ctx: &FetchContext<'_>,
        progress_cb: Option<ProgressCb>,
        status_cb: Option<StatusCb>,
    ) -> Result<std::path::PathBuf, CascadeError> {
        let mut failure_count: HashMap<String, u32> = HashMap::new();

        for source in &self.sources {
            if ctx.cancel.is_cancelled() {
                return Err(CascadeError::Cancelled);
            }
            if !source.enabled || self.debug_skip.contains(&source.name) {
                continue;
            }
            if source.requires_bypass && !self.bypass_enabled {
                continue;
            }
            if *failure_count.get(&source.name).unwrap_or(&0) >= FAILURE_THRESHOLD {
                continue;
            }

            let mut urls = (self.resolve_urls)(content_hash, &source.name, source.kind);
            if urls.len() > 1 {
                let offset = self.round_robin.fetch_add(1, Ordering::Relaxed) as usize % urls.len();
                urls.rotate_left(offset);
            }

            for url in urls {
                if ctx.cancel.is_cancelled() {
                    return Err(CascadeError::Cancelled);
                }
                match self
                    .try_download(
                        &source.display_name,
                        &url,
                        source.requires_bypass,
                        ctx,
                        progress_cb.clone(),
                        status_cb.clone(),
                    )
                    .await
                {
                    Ok(path) => return Ok(path),
                    Err(e) => {
                        debug!(source = %source.name, url = %url, error = %e, "cascade: attempt failed");
                        let count = failure_count.entry(source.name.clone()).or_insert(0);
                        *count += 1;
                        if *count >= FAILURE_THRESHOLD {
                            break;
                        }
                    }
                }
            }
        }

        warn!("cascade: all sources failed for {content_hash}");
        Err(CascadeError::AllSourcesFailed)
    }

    /// The `try_download` sub-protocol (§4.6): resolve to a real download
    /// URL (following countdowns as needed), then stream the file to a temp
    /// path, rejecting short bodies as error pages.
    async fn try_download(
        &self,
        source_display_name: &str,
        start_url: &str,
        use_bypasser: bool,
        ctx: &FetchContext<'_>,
        progress_cb: Option<ProgressCb>,
        status_cb: Option<StatusCb>,
    ) -> Result<std::path::PathBuf, CascadeError> {
        if let Some(cb) = &status_cb {
            cb(&format!("{source_display_name} — resolving"));
        }

        let real_url = self.follow_to_download_url(start_url, use_bypasser, ctx, source_display_name, status_cb.clone()).await?;

        if let Some(cb) = &status_cb {
            cb(&format!("{source_display_name} — fetching"));
        }

        let cookies = self.bypass.cookies();
        let resolve = fetcher::resolve_entries(ctx.dns, &real_url).await;
        let cancel = ctx.cancel.clone();
        let start_url = start_url.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            fetcher::download(
                &real_url,
                None,
                progress_cb,
                cancel,
                &cookies,
                status_cb,
                Some(&start_url),
                &resolve,
            )
        })
        .await
        .map_err(|e| CascadeError::Fetch(FetcherError::Transport(e.to_string())))?
        .map_err(CascadeError::Fetch)?;

        let tmp = tempfile::Builder::new()
            .prefix("bookd-dl-")
            .tempfile()
            .map_err(|e| CascadeError::Fetch(FetcherError::Transport(e.to_string())))?;
        std::fs::write(tmp.path(), &outcome.bytes)
            .map_err(|e| CascadeError::Fetch(FetcherError::Transport(e.to_string())))?;
        let (_, path) = tmp.keep().map_err(|e| CascadeError::Fetch(FetcherError::Transport(e.to_string())))?;
        Ok(path)
    }

    async fn follow_to_download_url(
        &self,
        url: &str,
        use_bypasser: bool,
        ctx: &FetchContext<'_>,
        source_display_name: &str,
        status_cb: Option<StatusCb>,
    ) -> Result<String, CascadeError> {
        let mut current = url.to_string();
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(CascadeError::Cancelled);
            }
            let html = fetcher::html_get(&current, use_bypasser, ctx).await?;
            if html.is_empty() {
                return Err(CascadeError::Fetch(FetcherError::Http(404)));
            }
            match page::extract_link(&html) {
                PageLink::Direct(link) => return Ok(fetcher::absolute_url(&current, &link)),
                PageLink::Countdown(secs) => {
                    for remaining in (1..=secs).rev() {
                        if let Some(cb) = &status_cb {
                            cb(&format!("{source_display_name} — Waiting {remaining}s"));
                        }
                        if !ctx.cancel.sleep_cancellable(std::time::Duration::from_secs(1)).await {
                            return Err(CascadeError::Cancelled);
                        }
                    }
                    // Re-fetch after the countdown elapses.
                    continue;
                }
                PageLink::None => {
                    let anchors = page::anchor_texts_for_debug(&html, 10);
                    info!(?anchors, url = %current, "cascade: no extractable link, giving up on this url");
                    return Err(CascadeError::Fetch(FetcherError::Transport(
                        "no extractable link on partner page".to_string(),
                    )));
                }
            }
        }
    }
}

/// Adapts the cascade to the Scheduler's source-agnostic `DownloadHandler`
/// seam (§4.5): a task's `task_id` is treated as the content hash the
/// url-template sources key off of.
#[async_trait]
impl DownloadHandler for Cascade {
    fn name(&self) -> &str {
        "direct"
    }

    async fn download(
        &self,
        task: &Task,
        cancel: CancelToken,
        progress_cb: ProgressCb,
        status_cb: StatusCb,
    ) -> Result<Option<std::path::PathBuf>, RegistryError> {
        let ctx = FetchContext {
            selector: self.selector.as_ref(),
            bypass: self.bypass.as_ref(),
            dns: self.dns.as_deref(),
            cancel: cancel.clone(),
            custom_headers: HashMap::new(),
        };
        match self
            .download_content(&task.task_id, &ctx, Some(progress_cb), Some(status_cb))
            .await
        {
            Ok(path) => Ok(Some(path)),
            Err(CascadeError::Cancelled) => Ok(None),
            Err(e) => Err(RegistryError::HandlerFailed(e.to_string())),
        }
    }
}
