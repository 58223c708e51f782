use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod defaults;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub remote: RemoteConfig,
    pub fetch: FetchConfig,
    pub catalog: CatalogConfig,
    pub player: PlayerConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// HTTP endpoint serving `{base_url}/{collection}/{document}` as a JSON object.
    /// When unset, `static_fields` is used instead.
    pub base_url: Option<String>,
    pub collection: String,
    pub document: String,
    pub version_field: String,
    /// Playlist slots, ingested in this order.
    pub source_keys: Vec<String>,
    pub timeout_secs: u64,
    pub static_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub preferred_group: String,
    pub preferred_channel: String,
    pub sidebar_picks: Vec<SidebarPick>,
    pub sidebar_size: usize,
    /// Rough channels-per-source figure used for the progress estimate.
    pub per_source_estimate: u64,
    pub progress_log_every: u64,
    /// Upper bound on live entries kept from one playlist.
    pub max_channels_per_source: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidebarPick {
    /// Name variants, tried in order.
    pub names: Vec<String>,
    /// Look inside the preferred group before searching the whole catalog.
    #[serde(default)]
    pub preferred_group_first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub mpv_path: String,
    /// mpv audio device name (see `mpv --audio-device=help`)
    pub audio_device: Option<String>,
    /// Volume level (0-100)
    pub volume: u8,
    pub settle_ms: u64,
    pub refresh_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub buffering_timeout_ms: u64,
    pub buffering_poll_ms: u64,
    pub stuck_sample_ms: u64,
    pub stuck_checks: u32,
    pub stuck_min_advance_ms: u64,
    pub network_retry_ms: u64,
    /// First delay before reloading after a non-network player error.
    pub error_retry_ms: u64,
    /// Error retry delays double per failure up to this cap.
    pub error_backoff_max_ms: u64,
    pub discontinuity_resume_ms: u64,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Keep recovering forever; the watches are the only brake.
    Unlimited,
    /// Give up after `max_attempts` recoveries without a sustained Ready.
    Bounded { max_attempts: u32 },
}

impl HealthConfig {
    pub fn buffering_timeout(&self) -> Duration {
        Duration::from_millis(self.buffering_timeout_ms)
    }
    pub fn buffering_poll(&self) -> Duration {
        Duration::from_millis(self.buffering_poll_ms.max(1))
    }
    pub fn stuck_sample(&self) -> Duration {
        Duration::from_millis(self.stuck_sample_ms.max(1))
    }
    pub fn stuck_min_advance(&self) -> Duration {
        Duration::from_millis(self.stuck_min_advance_ms)
    }
    pub fn network_retry(&self) -> Duration {
        Duration::from_millis(self.network_retry_ms)
    }
    pub fn error_retry(&self) -> Duration {
        Duration::from_millis(self.error_retry_ms)
    }
    pub fn error_backoff_max(&self) -> Duration {
        Duration::from_millis(self.error_backoff_max_ms)
    }
    pub fn discontinuity_resume(&self) -> Duration {
        Duration::from_millis(self.discontinuity_resume_ms)
    }
}

impl PlayerConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

impl Config {
    pub fn catalog_path(&self) -> PathBuf {
        self.paths.data_dir.join("catalog.sqlite3")
    }
}

fn write_config(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let raw = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        use tracing::warn;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), error = %e, "could not restrict config permissions");
        }
    }
    Ok(())
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "livetv", "livetv").context("ProjectDirs unavailable")?;
    Ok(proj.config_dir().join("config.toml"))
}

pub fn load(override_path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        let cfg = defaults::defaults();
        write_config(&cfg, &path).context("write default config")?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg = toml::from_str::<Config>(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
