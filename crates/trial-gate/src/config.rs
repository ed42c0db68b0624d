//! Application configuration loaded from environment variables.

use abuse_signals::{ClientEnvironment, DetectionConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use trial_identity::Digester;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Abuse detection, including the per-probe sections
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Usage flag storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Email acceptance rules
    #[serde(default)]
    pub identity: IdentityConfig,

    /// What the embedding page reports about the visitor
    #[serde(default)]
    pub client: ClientEnvironment,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// File backing the indexed record store
    #[serde(default = "default_indexed_path")]
    pub indexed_path: PathBuf,

    /// Bound on a single backend read or write
    #[serde(default = "default_backend_timeout", with = "humantime_serde")]
    pub backend_timeout: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    /// Domains rejected in addition to the built-in disposable list
    #[serde(default, deserialize_with = "list_or_comma_separated")]
    pub extra_disposable_domains: Vec<String>,

    /// Fingerprint digest: `sha256`, or `rolling` where SHA-256 is unavailable
    #[serde(default)]
    pub digester: Digester,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// How long a VPN block is shown before the visitor may retry
    #[serde(default = "default_block_cooldown", with = "humantime_serde")]
    pub block_cooldown: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            storage: StorageConfig::default(),
            identity: IdentityConfig::default(),
            client: ClientEnvironment::default(),
            orchestrator: OrchestratorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            indexed_path: default_indexed_path(),
            backend_timeout: default_backend_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            block_cooldown: default_block_cooldown(),
        }
    }
}

// Default value functions
fn default_indexed_path() -> PathBuf {
    PathBuf::from("./data/freetrial-usage.json")
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_block_cooldown() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_log_level() -> String {
    "info".into()
}

fn list_or_comma_separated<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match ListOrString::deserialize(deserializer)? {
        ListOrString::List(list) => list,
        ListOrString::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    })
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Nested keys use `__`, e.g. `DETECTION__LATENCY__REQUEST_TIMEOUT=2s`.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_source(config::Environment::default())
    }

    fn from_source(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                env.separator("__")
                    // Keep strings as strings; serde converts where needed
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
