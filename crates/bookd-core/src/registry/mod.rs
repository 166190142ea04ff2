//! Source Registry (§4.5): a process-global mapping of release sources and
//! download handlers, registered by name at startup rather than via
//! decorator-based dynamic discovery (§9 redesign).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::fetcher::{ProgressCb, StatusCb};
use crate::queue::Task;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("source already registered: {0}")]
    AlreadyRegistered(String),
    #[error("{0}")]
    HandlerFailed(String),
}

/// A single column in a release source's machine-readable schema, sent to
/// the UI so it can render arbitrary sources without per-source frontend code.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnSpec {
    pub key: String,
    pub label: String,
    pub render_hint: String,
    pub width: Option<u32>,
    pub mobile_visible: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnConfig {
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookMetadata {
    pub query: Option<String>,
    pub isbn: Vec<String>,
    pub author: Vec<String>,
    pub title: Vec<String>,
    pub language: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Dcc,
    Torrent,
    Nzb,
}

/// Search result emitted by a release source (§3.3). Ephemeral: either
/// converted into a `Task` on queue, or cached briefly by the source.
#[derive(Debug, Clone, Serialize)]
pub struct Release {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub format: String,
    pub language: Option<String>,
    pub size: Option<String>,
    pub size_bytes: Option<u64>,
    pub download_url: Option<String>,
    pub info_url: Option<String>,
    pub protocol: Protocol,
    pub indexer: Option<String>,
    pub seeders: Option<u32>,
    pub peers: Option<u32>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Implemented by release-search plugins (e.g. a catalog search source).
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    fn name(&self) -> &str;
    async fn search(
        &self,
        metadata: &BookMetadata,
        expand_search: bool,
        languages: &[String],
    ) -> Result<Vec<Release>, RegistryError>;
    fn is_available(&self) -> bool;
    fn get_column_config(&self) -> ColumnConfig;
}

/// Implemented by source-specific download handlers (e.g. the direct-download
/// cascade, §4.6). The scheduler provides `progress_cb`/`status_cb`; handlers
/// may call either freely, as often as they like — throttling happens on the
/// broadcaster side, not here.
#[async_trait]
pub trait DownloadHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn download(
        &self,
        task: &Task,
        cancel: CancelToken,
        progress_cb: ProgressCb,
        status_cb: StatusCb,
    ) -> Result<Option<std::path::PathBuf>, RegistryError>;
    /// Optional: most handlers rely on the shared `CancelToken` instead.
    fn cancel(&self, _task_id: &str) {}
}

/// Append-only process-wide registry, populated at startup and never
/// mutated afterward (§5's "global process-wide state" list, item a).
#[derive(Default)]
pub struct SourceRegistry {
    release_sources: HashMap<String, Arc<dyn ReleaseSource>>,
    download_handlers: HashMap<String, Arc<dyn DownloadHandler>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_release_source(
        &mut self,
        source: Arc<dyn ReleaseSource>,
    ) -> Result<(), RegistryError> {
        let name = source.name().to_string();
        if self.release_sources.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.release_sources.insert(name, source);
        Ok(())
    }

    pub fn register_download_handler(
        &mut self,
        handler: Arc<dyn DownloadHandler>,
    ) -> Result<(), RegistryError> {
        let name = handler.name().to_string();
        if self.download_handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.download_handlers.insert(name, handler);
        Ok(())
    }

    pub fn release_source(&self, name: &str) -> Result<Arc<dyn ReleaseSource>, RegistryError> {
        self.release_sources
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))
    }

    pub fn download_handler(&self, name: &str) -> Result<Arc<dyn DownloadHandler>, RegistryError> {
        self.download_handlers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))
    }

    pub fn release_source_names(&self) -> Vec<String> {
        self.release_sources.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    #[async_trait]
    impl DownloadHandler for NullHandler {
        fn name(&self) -> &str {
            "null"
        }
        async fn download(
            &self,
            _task: &Task,
            _cancel: CancelToken,
            _progress_cb: ProgressCb,
            _status_cb: StatusCb,
        ) -> Result<Option<std::path::PathBuf>, RegistryError> {
            Ok(None)
        }
    }

    #[test]
    fn unknown_handler_returns_clean_error() {
        let registry = SourceRegistry::new();
        let err = registry.download_handler("missing").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownSource(_)));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = SourceRegistry::new();
        registry
            .register_download_handler(Arc::new(NullHandler))
            .unwrap();
        let err = registry
            .register_download_handler(Arc::new(NullHandler))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn registered_handler_is_retrievable() {
        let mut registry = SourceRegistry::new();
        registry
            .register_download_handler(Arc::new(NullHandler))
            .unwrap();
        assert!(registry.download_handler("null").is_ok());
    }
}
