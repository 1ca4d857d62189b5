use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;
use crate::plateau;
use crate::readiness::HRV_BASELINE_DAYS;

pub const ENV_DATABASE_PATH: &str = "LIFTRS_DATABASE_PATH";
pub const ENV_BIND: &str = "LIFTRS_BIND";
pub const ENV_JWT_SECRET: &str = "LIFTRS_JWT_SECRET";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerSettings,

    /// Persistent store
    pub database: DatabaseSettings,

    /// Bearer token settings
    pub auth: AuthSettings,

    pub logging: LogConfig,

    /// Tunables of the recommendation engine
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address to listen on
    pub bind: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: liftrs_home().join("liftrs.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 signing secret
    pub jwt_secret: String,

    /// Lifetime of issued access tokens in hours
    pub token_ttl_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            token_ttl_hours: 24,
        }
    }
}

/// Engine tunables; defaults match the documented model constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Most recent 1RM samples considered by the plateau check
    pub plateau_check_window: usize,

    /// Samples required before the online plateau check runs
    pub min_history_for_plateau_check: usize,

    /// Confirmed-window length for the online check
    pub online_min_duration: usize,

    /// Default confirmed-window length for explicit analysis
    pub analysis_min_duration: usize,

    /// Suppression window for repeated plateau events
    pub cooldown_weeks: i64,

    pub hrv_baseline_days: i64,

    /// How far back fatigue stimulus is loaded
    pub fatigue_lookback_days: i64,

    /// Learning rate given to new users
    pub default_rir_bias_lr: f64,

    /// Fixed deload length; derived from severity when unset
    pub default_deload_weeks: Option<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            plateau_check_window: plateau::PLATEAU_CHECK_WINDOW,
            min_history_for_plateau_check: plateau::MIN_HISTORY_FOR_PLATEAU_CHECK,
            online_min_duration: plateau::ONLINE_MIN_DURATION,
            analysis_min_duration: plateau::ANALYSIS_MIN_DURATION,
            cooldown_weeks: plateau::COOLDOWN_WEEKS,
            hrv_baseline_days: HRV_BASELINE_DAYS,
            fatigue_lookback_days: 14,
            default_rir_bias_lr: 0.10,
            default_deload_weeks: None,
        }
    }
}

fn liftrs_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".liftrs")
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        liftrs_home().join("config.toml")
    }

    /// Load configuration with fallback to defaults; environment overrides apply either way
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            if path.is_some() {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `LIFTRS_*` overrides through a lookup function
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.is_empty()) {
            self.server.bind = bind;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|v| !v.is_empty()) {
            self.auth.jwt_secret = secret;
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.plateau_check_window < 2 {
            anyhow::bail!("engine.plateau_check_window must be at least 2");
        }
        if engine.online_min_duration < 2 || engine.analysis_min_duration < 2 {
            anyhow::bail!("plateau minimum durations must be at least 2");
        }
        if engine.cooldown_weeks < 0 || engine.hrv_baseline_days <= 0 || engine.fatigue_lookback_days <= 0 {
            anyhow::bail!("engine windows must be positive");
        }
        if !(engine.default_rir_bias_lr > 0.0 && engine.default_rir_bias_lr <= 1.0) {
            anyhow::bail!("engine.default_rir_bias_lr must be in (0, 1]");
        }
        if self.auth.token_ttl_hours <= 0 {
            anyhow::bail!("auth.token_ttl_hours must be positive");
        }
        Ok(())
    }
}
