//! Typed configuration loaded from `~/.config/bookd/config.toml`.
//!
//! One typed substruct per settings group, rather than a dynamically-typed
//! `get(key, default)` registry.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub network: NetworkConfig,
    pub dns: DnsConfig,
    pub bypass: BypassConfig,
    pub ingest: IngestConfig,
    pub auth: AuthConfig,
}

/// Max concurrent downloads, main-loop sleep, progress update interval, stall timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_downloads: usize,
    pub main_loop_sleep_secs: u64,
    pub progress_update_interval_secs: u64,
    pub stall_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            main_loop_sleep_secs: 5,
            progress_update_interval_secs: 5,
            stall_timeout_secs: 300,
        }
    }
}

/// Mirror list and additional mirrors, HTTP/HTTPS proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mirrors: Vec<String>,
    pub extra_mirrors: Vec<String>,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            extra_mirrors: Vec::new(),
            http_proxy: None,
            https_proxy: None,
        }
    }
}

/// DNS provider in {auto, system, a named provider, manual with IP list}, DoH on/off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub mode: DnsMode,
    pub manual_nameservers: Vec<String>,
    pub doh_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsMode {
    Auto,
    System,
    Cloudflare,
    Google,
    Quad9,
    Opendns,
    Manual,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            mode: DnsMode::Auto,
            manual_nameservers: Vec::new(),
            doh_enabled: true,
        }
    }
}

/// Bypass backend choice and endpoint, donor-key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BypassConfig {
    pub backend: BypassBackendKind,
    pub external_endpoint: Option<String>,
    pub donor_key: Option<String>,
    pub release_inactive_min: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassBackendKind {
    External,
    Embedded,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            backend: BypassBackendKind::External,
            external_endpoint: None,
            donor_key: None,
            release_inactive_min: 5,
        }
    }
}

/// Per-content-type ingest directory overrides, supported file-format allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub base_dir: PathBuf,
    pub content_type_dirs: std::collections::BTreeMap<String, PathBuf>,
    pub supported_formats: Vec<String>,
    pub supported_audiobook_formats: Vec<String>,
    pub title_as_filename: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("ingest"),
            content_type_dirs: std::collections::BTreeMap::new(),
            supported_formats: vec![
                "epub".into(),
                "mobi".into(),
                "azw3".into(),
                "fb2".into(),
                "djvu".into(),
                "cbz".into(),
                "cbr".into(),
            ],
            supported_audiobook_formats: vec!["m4b".into(), "mp3".into()],
            title_as_filename: true,
        }
    }
}

/// Login lockout thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub auth_db_path: Option<PathBuf>,
    pub max_login_attempts: u32,
    pub lockout_duration_minutes: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_db_path: None,
            max_login_attempts: 10,
            lockout_duration_minutes: 30,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            network: NetworkConfig::default(),
            dns: DnsConfig::default(),
            bypass: BypassConfig::default(),
            ingest: IngestConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bookd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AppConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = AppConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: AppConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scheduler_values() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 3);
        assert_eq!(cfg.main_loop_sleep_secs, 5);
        assert_eq!(cfg.progress_update_interval_secs, 5);
        assert_eq!(cfg.stall_timeout_secs, 300);
    }

    #[test]
    fn default_auth_values() {
        let cfg = AuthConfig::default();
        assert_eq!(cfg.max_login_attempts, 10);
        assert_eq!(cfg.lockout_duration_minutes, 30);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = AppConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&toml).unwrap();
        assert_eq!(
            parsed.scheduler.max_concurrent_downloads,
            cfg.scheduler.max_concurrent_downloads
        );
        assert_eq!(parsed.dns.mode, cfg.dns.mode);
        assert_eq!(
            parsed.ingest.supported_formats,
            cfg.ingest.supported_formats
        );
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            [scheduler]
            max_concurrent_downloads = 8
            main_loop_sleep_secs = 2
            progress_update_interval_secs = 1
            stall_timeout_secs = 60

            [network]
            mirrors = ["https://mirror-a.example"]
            extra_mirrors = []

            [dns]
            mode = "manual"
            manual_nameservers = ["9.9.9.9"]
            doh_enabled = false

            [bypass]
            backend = "embedded"
            release_inactive_min = 10

            [ingest]
            base_dir = "/data/ingest"
            supported_formats = ["epub"]
            supported_audiobook_formats = []
            title_as_filename = false

            [auth]
            max_login_attempts = 5
            lockout_duration_minutes = 15
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.scheduler.max_concurrent_downloads, 8);
        assert_eq!(cfg.dns.mode, DnsMode::Manual);
        assert_eq!(cfg.bypass.backend, BypassBackendKind::Embedded);
        assert!(!cfg.ingest.title_as_filename);
        assert_eq!(cfg.auth.max_login_attempts, 5);
    }
}
