use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::model::DealThresholds;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub poller: PollerConfig,
    pub cache: CacheConfig,
    pub refresh: RefreshConfig,
    pub broadcast: BroadcastConfig,
    pub scraper: ScraperConfig,
    pub store: StoreConfig,
    pub deals: DealThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_seconds: u64,
    pub initial_delay_seconds: u64,
    pub batch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub staleness_seconds: u64,
    pub cooldown_seconds: u64,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub workers: usize,
    pub send_timeout_millis: u64,
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            initial_delay_seconds: 10,
            batch_limit: 50,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            staleness_seconds: 60 * 60,
            cooldown_seconds: 60,
            workers: 5,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            workers: 50,
            send_timeout_millis: 2_000,
            shutdown_grace_seconds: 5,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tiki.vn".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("pricewatch"))
    }

    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join("config.json"))
    }

    /// Loads the config file, falling back to (and writing out) defaults when
    /// it is missing or unreadable. Environment overrides are applied last.
    pub fn load() -> Self {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "could not load config, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "could not write default config");
                }
                default_config
            }
        };
        config.apply_env();
        config
    }

    fn load_from_file() -> Result<Self, ConfigError> {
        let path = Self::config_file_path()?;
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_file_path()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(port) = std::env::var("PRICEWATCH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(dir) = std::env::var("PRICEWATCH_DATA_DIR") {
            self.store.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Data directory for the file store; defaults to `<config dir>/data`.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.store.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("data")),
        }
    }
}

impl PollerConfig {
    /// Never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl RefreshConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
