//! Configuration loading and parsing.
//!
//! Defines the TOML schema for the tab player and resolves defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use player_bus_types::TrackProjection;

use crate::bus::PlayerBus;
use crate::resolver::CatalogEntry;
use crate::session::{SessionCredentials, SessionStore};

pub const DEFAULT_CHANNEL: &str = "player";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_BUS_CAPACITY: usize = 64;
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const MAX_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct TabPlayerConfig {
    /// Broadcast channel name shared by all tabs.
    pub channel: Option<String>,
    /// How long a probing tab waits for the active player to answer.
    pub probe_timeout_ms: Option<u64>,
    /// Bounded capacity of the in-process bus.
    pub bus_capacity: Option<usize>,
    /// Base URL of the song-resolution API (e.g. `https://host/api`).
    pub api_base_url: Option<String>,
    /// Bearer token the tabs start out signed in with.
    pub api_token: Option<String>,
    /// Timeout for resolution requests.
    pub request_timeout_ms: Option<u64>,
    /// Login surface path used for unauthorized redirects.
    pub login_path: Option<String>,
    /// Static catalog used when no API is configured.
    pub catalog: Option<Vec<CatalogTrackConfig>>,
}

/// One `[[catalog]]` entry.
#[derive(Debug, Deserialize)]
pub struct CatalogTrackConfig {
    pub id: u64,
    pub title: String,
    pub artist: Option<String>,
    pub cover: Option<String>,
    /// Streaming identifier; omit to model an unprocessed track.
    pub stream_id: Option<String>,
    /// Forced HTTP-style failure status (401/403 for unauthorized).
    pub status: Option<u16>,
    /// Forced failure reason.
    pub error: Option<String>,
}

/// Coordinator settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub probe_timeout: Duration,
    pub login_path: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

impl TabPlayerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<TabPlayerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve coordinator settings; a CLI override wins over the file.
pub fn coordinator_settings_from_config(
    cfg: &TabPlayerConfig,
    probe_timeout_override_ms: Option<u64>,
) -> Result<CoordinatorSettings> {
    let probe_ms = probe_timeout_override_ms
        .or(cfg.probe_timeout_ms)
        .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS);
    if probe_ms == 0 || probe_ms > MAX_PROBE_TIMEOUT_MS {
        return Err(anyhow::anyhow!(
            "probe_timeout_ms must be between 1 and {MAX_PROBE_TIMEOUT_MS}, got {probe_ms}"
        ));
    }
    Ok(CoordinatorSettings {
        probe_timeout: Duration::from_millis(probe_ms),
        login_path: non_empty(cfg.login_path.as_deref())
            .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
    })
}

/// Build the shared bus described by the config.
pub fn bus_from_config(cfg: &TabPlayerConfig) -> PlayerBus {
    let channel =
        non_empty(cfg.channel.as_deref()).unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
    PlayerBus::new(channel, cfg.bus_capacity.unwrap_or(DEFAULT_BUS_CAPACITY))
}

/// Extract the optional API base URL.
pub fn api_base_url_from_config(cfg: &TabPlayerConfig) -> Option<String> {
    non_empty(cfg.api_base_url.as_deref()).map(|url| url.trim_end_matches('/').to_string())
}

/// Session shared by every tab of the browser profile.
pub fn session_from_config(cfg: &TabPlayerConfig) -> SessionStore {
    SessionStore::new(SessionCredentials {
        token: non_empty(cfg.api_token.as_deref()),
        ..Default::default()
    })
}

pub fn request_timeout_from_config(cfg: &TabPlayerConfig) -> Duration {
    Duration::from_millis(cfg.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
}

/// Convert `[[catalog]]` entries for the static resolver.
pub fn catalog_from_config(cfg: &TabPlayerConfig) -> Vec<CatalogEntry> {
    cfg.catalog
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|entry| CatalogEntry {
            track: TrackProjection::new(
                entry.id,
                entry.title.clone(),
                entry.artist.clone().unwrap_or_default(),
                entry.cover.clone(),
            ),
            stream_id: non_empty(entry.stream_id.as_deref()),
            failure: match (entry.status, entry.error.as_ref()) {
                (None, None) => None,
                (status, error) => Some((status.unwrap_or(200), error.cloned())),
            },
        })
        .collect()
}
