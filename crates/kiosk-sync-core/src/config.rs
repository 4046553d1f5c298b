//! Kiosk networking configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/kiosk-sync/config.toml)
//! 3. Environment variables (KIOSK_SYNC_* prefix)
//!
//! Environment variables take precedence over config file values. A missing
//! or malformed `base_url` is rejected by [`Config::validate`]; services are
//! never built from an invalid configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueLimits;
use crate::rate_limiter::BucketLimits;
use crate::realtime::ChannelSettings;
use crate::retry::RetryPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "KIOSK_SYNC";

/// Configuration problems detected at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("base_url is not configured; set it in the config file or KIOSK_SYNC_BASE_URL")]
    MissingBaseUrl,

    #[error("{field} '{value}' is not a valid URL: {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}

/// Where the offline queue snapshot is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// JSON file in the data directory
    #[default]
    File,
    /// SQLite database in the data directory
    Sqlite,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(QueueBackend::File),
            "sqlite" => Ok(QueueBackend::Sqlite),
            other => Err(format!("unknown queue backend '{}'", other)),
        }
    }
}

/// Networking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend REST base URL, e.g. `https://api.example.com/v1`
    pub base_url: Option<String>,

    /// Push channel URL; derived from `base_url` when unset
    pub realtime_url: Option<String>,

    /// Whether the push channel is used at all
    pub realtime_enabled: bool,

    /// Directory for the persisted queue
    pub data_dir: PathBuf,

    pub queue_backend: QueueBackend,

    pub max_tokens: u32,
    pub refill_rate_per_interval: u32,
    pub refill_interval_ms: u64,

    pub max_queue_size: usize,
    pub max_queue_age_ms: u64,

    pub heartbeat_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,

    /// Attempts per queued operation before it counts as one failure
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Failures in a row that stop a drain pass
    pub max_consecutive_failures: u32,

    pub request_timeout_ms: u64,
    pub probe_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            realtime_url: None,
            realtime_enabled: false,
            data_dir: default_data_dir(),
            queue_backend: QueueBackend::File,
            max_tokens: 60,
            refill_rate_per_interval: 1,
            refill_interval_ms: 1000,
            max_queue_size: 50,
            max_queue_age_ms: 7 * 24 * 60 * 60 * 1000,
            heartbeat_interval_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            max_consecutive_failures: 3,
            request_timeout_ms: 10_000,
            probe_interval_ms: 15_000,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply KIOSK_SYNC_* overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = env_var("BASE_URL") {
            self.base_url = non_empty(val);
        }
        if let Some(val) = env_var("REALTIME_URL") {
            self.realtime_url = non_empty(val);
        }
        if let Some(val) = env_var("REALTIME_ENABLED") {
            self.realtime_enabled = parse_bool(&val);
        }
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Some(val) = env_var("QUEUE_BACKEND") {
            self.queue_backend = val
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{}_QUEUE_BACKEND: {}", ENV_PREFIX, e))?;
        }

        override_number("MAX_TOKENS", &mut self.max_tokens)?;
        override_number("REFILL_RATE_PER_INTERVAL", &mut self.refill_rate_per_interval)?;
        override_number("REFILL_INTERVAL_MS", &mut self.refill_interval_ms)?;
        override_number("MAX_QUEUE_SIZE", &mut self.max_queue_size)?;
        override_number("MAX_QUEUE_AGE_MS", &mut self.max_queue_age_ms)?;
        override_number("HEARTBEAT_INTERVAL_MS", &mut self.heartbeat_interval_ms)?;
        override_number("MAX_RECONNECT_ATTEMPTS", &mut self.max_reconnect_attempts)?;
        override_number("RECONNECT_BASE_DELAY_MS", &mut self.reconnect_base_delay_ms)?;
        override_number("MAX_RECONNECT_DELAY_MS", &mut self.max_reconnect_delay_ms)?;
        override_number("RETRY_ATTEMPTS", &mut self.retry_attempts)?;
        override_number("RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms)?;
        override_number("MAX_CONSECUTIVE_FAILURES", &mut self.max_consecutive_failures)?;
        override_number("REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        override_number("PROBE_INTERVAL_MS", &mut self.probe_interval_ms)?;

        Ok(())
    }

    /// Check everything needed before any network activity
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if let Some(ref url) = self.realtime_url {
            Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                field: "realtime_url",
                value: url.clone(),
                reason: e.to_string(),
            })?;
        }

        let non_zero = [
            ("max_tokens", u64::from(self.max_tokens)),
            ("refill_rate_per_interval", u64::from(self.refill_rate_per_interval)),
            ("refill_interval_ms", self.refill_interval_ms),
            ("max_queue_size", self.max_queue_size as u64),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("retry_attempts", u64::from(self.retry_attempts)),
            ("max_consecutive_failures", u64::from(self.max_consecutive_failures)),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }

        Ok(())
    }

    /// Parsed base URL
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;

        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            field: "base_url",
            value: raw.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                field: "base_url",
                value: raw.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        Ok(url)
    }

    /// Push channel URL: explicit `realtime_url`, else `base_url` with a
    /// websocket scheme and `/ws` appended
    pub fn realtime_url(&self) -> Option<String> {
        if let Some(ref url) = self.realtime_url {
            return Some(url.clone());
        }

        let mut url = self.base_url().ok()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).ok()?;
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Some(url.to_string())
    }

    pub fn bucket_limits(&self) -> BucketLimits {
        BucketLimits {
            max_tokens: self.max_tokens,
            refill_rate: self.refill_rate_per_interval,
            refill_interval: Duration::from_millis(self.refill_interval_ms),
        }
    }

    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_size: self.max_queue_size,
            max_age: Duration::from_millis(self.max_queue_age_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            refill_interval: Duration::from_millis(self.refill_interval_ms),
        }
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            enabled: self.realtime_enabled,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with KIOSK_SYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiosk-sync")
            .join("config.toml")
    }

    /// Path of the SQLite database when `queue_backend = "sqlite"`
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("kiosk-sync.db")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn override_number<T>(name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(val) = env_var(name) {
        *target = val
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}_{}='{}': {}", ENV_PREFIX, name, val, e))?;
    }
    Ok(())
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kiosk-sync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "KIOSK_SYNC_BASE_URL",
        "KIOSK_SYNC_REALTIME_URL",
        "KIOSK_SYNC_REALTIME_ENABLED",
        "KIOSK_SYNC_DATA_DIR",
        "KIOSK_SYNC_QUEUE_BACKEND",
        "KIOSK_SYNC_MAX_TOKENS",
        "KIOSK_SYNC_MAX_QUEUE_SIZE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.base_url.is_none());
        assert!(!config.realtime_enabled);
        assert_eq!(config.max_tokens, 60);
        assert_eq!(config.refill_rate_per_interval, 1);
        assert_eq!(config.refill_interval_ms, 1000);
        assert_eq!(config.max_queue_size, 50);
        assert_eq!(config.max_queue_age_ms, 604_800_000);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(config.data_dir.ends_with("kiosk-sync"));
    }

    #[test]
    fn test_missing_base_url_is_fatal() {
        let config = Config::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingBaseUrl));

        let blank = Config {
            base_url: Some("  ".to_string()),
            ..Config::default()
        };
        assert_eq!(blank.validate(), Err(ConfigError::MissingBaseUrl));
    }

    #[test]
    fn test_invalid_base_url() {
        let config = Config {
            base_url: Some("ftp://kiosk.local".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "base_url", .. })
        ));
    }

    #[test]
    fn test_zero_value_rejected() {
        let config = Config {
            base_url: Some("http://localhost:8000".to_string()),
            refill_interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                field: "refill_interval_ms"
            })
        );
    }

    #[test]
    fn test_realtime_url_derived_from_base() {
        let config = Config {
            base_url: Some("https://api.example.com/v1/".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.realtime_url().as_deref(),
            Some("wss://api.example.com/v1/ws")
        );

        let config = Config {
            base_url: Some("http://localhost:8000".to_string()),
            ..Config::default()
        };
        assert_eq!(config.realtime_url().as_deref(), Some("ws://localhost:8000/ws"));

        let config = Config {
            base_url: Some("http://localhost:8000".to_string()),
            realtime_url: Some("ws://push.local/updates".to_string()),
            ..Config::default()
        };
        assert_eq!(config.realtime_url().as_deref(), Some("ws://push.local/updates"));

        assert!(Config::default().realtime_url().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("KIOSK_SYNC_BASE_URL", "http://kiosk-api:8000");
        env::set_var("KIOSK_SYNC_REALTIME_ENABLED", "true");
        env::set_var("KIOSK_SYNC_MAX_TOKENS", "10");
        env::set_var("KIOSK_SYNC_QUEUE_BACKEND", "sqlite");

        let mut config = Config::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.base_url.as_deref(), Some("http://kiosk-api:8000"));
        assert!(config.realtime_enabled);
        assert_eq!(config.max_tokens, 10);
        assert_eq!(config.queue_backend, QueueBackend::Sqlite);

        // Empty string clears it
        env::set_var("KIOSK_SYNC_BASE_URL", "");
        config.apply_env_overrides().unwrap();
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_env_override_bad_number() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("KIOSK_SYNC_MAX_QUEUE_SIZE", "lots");
        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_err());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            base_url = "https://api.example.com"
            realtime_enabled = true
            max_queue_size = 20
            queue_backend = "sqlite"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert!(config.realtime_enabled);
        assert_eq!(config.max_queue_size, 20);
        assert_eq!(config.queue_backend, QueueBackend::Sqlite);
        // Unspecified options keep their defaults
        assert_eq!(config.max_tokens, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config {
            base_url: Some("http://localhost:8000".to_string()),
            max_reconnect_attempts: 8,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.base_url.is_none());
        assert_eq!(config.max_queue_size, 50);
    }

    #[test]
    fn test_component_settings() {
        let config = Config::default();
        assert_eq!(config.bucket_limits(), BucketLimits::default());
        assert_eq!(config.queue_limits(), QueueLimits::default());
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.channel_settings().max_attempts, 5);
        assert_eq!(
            config.channel_settings().heartbeat_interval,
            Duration::from_secs(30)
        );
    }
}
