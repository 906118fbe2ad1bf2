//! botgrid.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub revisions: RevisionConfig,
    #[serde(default)]
    pub dialog: DialogDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Fleet-unique id of this process.
    #[serde(default = "generated_server_id")]
    pub id: String,
    pub hostname: Option<String>,
    /// Primary processes never publish health snapshots.
    #[serde(default)]
    pub primary: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: generated_server_id(),
            hostname: None,
            primary: false,
        }
    }
}

impl ServerConfig {
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the redb database. In-memory when absent.
    pub path: Option<PathBuf>,
    /// Local directory that receives extracted dependency caches.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    #[serde(default = "default_expiry")]
    pub expiry: String,
    #[serde(default = "default_publish_debounce")]
    pub publish_debounce: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            expiry: default_expiry(),
            publish_debounce: default_publish_debounce(),
        }
    }
}

impl HealthConfig {
    pub fn refresh_interval(&self) -> Duration {
        parse_duration(&self.refresh_interval).unwrap_or(Duration::from_secs(15))
    }

    pub fn expiry(&self) -> Duration {
        parse_duration(&self.expiry).unwrap_or(Duration::from_secs(20))
    }

    pub fn publish_debounce(&self) -> Duration {
        parse_duration(&self.publish_debounce).unwrap_or(Duration::from_millis(500))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionConfig {
    /// Number of revisions kept per (workload, stage).
    #[serde(default = "default_max_revisions")]
    pub max: usize,
    /// Snapshot automatically around promotions.
    #[serde(default)]
    pub auto_revision: bool,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            max: default_max_revisions(),
            auto_revision: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogDefaults {
    /// Fleet-wide session timeout.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: String,
}

impl Default for DialogDefaults {
    fn default() -> Self {
        Self {
            session_timeout: default_session_timeout(),
        }
    }
}

impl DialogDefaults {
    pub fn session_timeout(&self) -> Duration {
        parse_duration(&self.session_timeout).unwrap_or(Duration::from_secs(30 * 60))
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: GridConfig = toml::from_str(content)?;
        for (field, value) in [
            ("health.refresh_interval", &config.health.refresh_interval),
            ("health.expiry", &config.health.expiry),
            ("health.publish_debounce", &config.health.publish_debounce),
            ("dialog.session_timeout", &config.dialog.session_timeout),
        ] {
            if parse_duration(value).is_none() {
                anyhow::bail!("invalid duration for {field}: {value:?}");
            }
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "500ms", "15s", "30m", "1h", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn generated_server_id() -> String {
    format!("srv-{:x}-{:08x}", std::process::id(), rand::random::<u32>())
}

fn default_refresh_interval() -> String {
    "15s".to_string()
}

fn default_expiry() -> String {
    "20s".to_string()
}

fn default_publish_debounce() -> String {
    "500ms".to_string()
}

fn default_max_revisions() -> usize {
    10
}

fn default_session_timeout() -> String {
    "30m".to_string()
}
