use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_songs_limit")]
    pub songs_limit: u32,
    #[serde(default = "default_gags_limit")]
    pub gags_limit: u32,
    #[serde(default = "default_archive_limit")]
    pub archive_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    #[serde(default = "default_true")]
    pub archive_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_total_cap")]
    pub total_cap: usize,
    #[serde(default = "default_shrink_limits")]
    pub shrink_limits: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            max_retry: default_max_retry(),
            songs_limit: default_songs_limit(),
            gags_limit: default_gags_limit(),
            archive_limit: default_archive_limit(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            archive_enabled: true,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            max_pages: default_max_pages(),
            total_cap: default_total_cap(),
            shrink_limits: default_shrink_limits(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            sync: SyncConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://script.google.com/macros/s/AKfycbwybI81qIBMYN3AYNuPiD4WjPNYHYWa8wkC2tp2Vfx8hedoHKe-boZPa6KRtGZCNoJpXQ/exec"
        .to_string()
}

fn default_timeout_ms() -> u64 {
    8000
}

fn default_max_retry() -> u32 {
    3
}

fn default_songs_limit() -> u32 {
    500
}

fn default_gags_limit() -> u32 {
    100
}

fn default_archive_limit() -> u32 {
    10
}

fn default_out_dir() -> String {
    "public-data".to_string()
}

fn default_page_limit() -> u32 {
    10
}

fn default_max_pages() -> u32 {
    200
}

fn default_total_cap() -> usize {
    5000
}

fn default_shrink_limits() -> Vec<u32> {
    vec![120, 80, 50, 30, 20, 10]
}

fn default_true() -> bool {
    true
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/gas-sync.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    repo_default: PathBuf,
) -> Option<PathBuf> {
    if let Some(path) = raw_path {
        return Some(path);
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
    }

    if repo_default.exists() {
        return Some(repo_default);
    }

    None
}

/// Picks the config file for this run, if any. The job runs on built-in
/// defaults plus env overrides when no file is present anywhere.
pub fn resolve_config_path(raw_path: Option<PathBuf>) -> Option<PathBuf> {
    resolve_config_path_with_overrides(raw_path, &["GAS_SYNC_CONFIG"], repo_default_config_path())
}

/// Comma-separated descending page-size candidates. Entries that are not
/// positive integers are dropped.
pub fn parse_limit_list(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .filter(|limit| *limit > 0)
        .collect()
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {key}: not a valid number: {raw}");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env_string(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        other => {
            warn!("ignoring {key}: expected true or false, got {other}");
            None
        }
    }
}

/// Applies the environment variables the deployment sets, on top of whatever
/// the file (or defaults) provided. Malformed values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Some(value) = env_string("GAS_URL") {
        cfg.endpoint.base_url = value;
    }
    if let Some(value) = env_string("OUT_DIR") {
        cfg.sync.out_dir = value;
    }
    if let Some(value) = env_parsed::<u64>("SYNC_TIMEOUT_MS") {
        cfg.endpoint.timeout_ms = value;
    }
    if let Some(value) = env_parsed::<u32>("SYNC_MAX_RETRY") {
        cfg.endpoint.max_retry = value;
    }
    if let Some(value) = env_bool("ENABLE_ARCHIVE_SYNC") {
        cfg.sync.archive_enabled = value;
    }
    if let Some(value) = env_parsed::<u32>("ARCHIVE_PAGE_LIMIT") {
        cfg.archive.page_limit = value;
    }
    if let Some(value) = env_parsed::<u32>("ARCHIVE_MAX_PAGES") {
        cfg.archive.max_pages = value;
    }
    if let Some(value) = env_parsed::<usize>("ARCHIVE_TOTAL_CAP") {
        cfg.archive.total_cap = value;
    }
    if let Some(raw) = env_string("ARCHIVE_LIMITS") {
        let limits = parse_limit_list(&raw);
        if limits.is_empty() {
            warn!("ignoring ARCHIVE_LIMITS with no usable entries: {raw}");
        } else {
            cfg.archive.shrink_limits = limits;
        }
    }
}

fn normalize_config(mut cfg: AppConfig) -> AppConfig {
    if cfg.endpoint.base_url.trim().is_empty() {
        cfg.endpoint.base_url = default_base_url();
    }
    cfg.endpoint.max_retry = cfg.endpoint.max_retry.max(1);
    cfg.sync.out_dir = expand_path(&cfg.sync.out_dir);
    cfg.archive.page_limit = cfg.archive.page_limit.max(1);
    if cfg.archive.shrink_limits.is_empty() {
        cfg.archive.shrink_limits = default_shrink_limits();
    }
    cfg
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
    let cfg: AppConfig = toml::from_str(&content).context("failed to parse TOML config")?;
    Ok(cfg)
}

/// Full loading pipeline for the binary: file (when resolved), then env
/// overrides, then normalization.
pub fn load_config_or_default(path: Option<&Path>) -> Result<AppConfig> {
    let mut cfg = match path {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(normalize_config(cfg))
}
