//! Config command handlers

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use kiosk_sync_core::Config;

use crate::output::{to_json, Output, OutputFormat};

const VALID_KEYS: &str = "base_url, realtime_url, realtime_enabled, data_dir, queue_backend, \
     max_tokens, refill_rate_per_interval, refill_interval_ms, max_queue_size, max_queue_age_ms, \
     heartbeat_interval_ms, max_reconnect_attempts, reconnect_base_delay_ms, \
     max_reconnect_delay_ms, retry_attempts, retry_base_delay_ms, max_consecutive_failures, \
     request_timeout_ms, probe_interval_ms";

fn load(config_path: &Path) -> Result<Config> {
    Config::load_from_path(&config_path.to_path_buf()).context("Failed to load configuration")
}

/// Show current configuration
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let config = load(config_path)?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", to_json(&config));
        }
        OutputFormat::Quiet => {
            println!("{}", config.base_url.as_deref().unwrap_or(""));
        }
        OutputFormat::Human => {
            println!("Configuration:");
            if let Value::Object(fields) = serde_json::to_value(&config)? {
                for (key, value) in fields {
                    let shown = match value {
                        Value::Null => "(not set)".to_string(),
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    println!("  {:<26} {}", format!("{}:", key), shown);
                }
            }
            println!(
                "  {:<26} {}",
                "realtime_url (effective):",
                config.realtime_url().unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", config_path.display());
            if let Err(e) = config.validate() {
                println!();
                println!("Warning: {}", e);
            }
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: &Path, output: &Output) -> Result<()> {
    let mut config = load(config_path)?;
    apply(&mut config, &key, &value)?;

    config
        .save_to_path(&config_path.to_path_buf())
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    if let Err(e) = config.validate() {
        output.message(&format!("Warning: {}", e));
    }

    Ok(())
}

/// Apply one `key = value` change
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "base_url" => config.base_url = optional(value),
        "realtime_url" => config.realtime_url = optional(value),
        "realtime_enabled" => {
            config.realtime_enabled = value
                .parse()
                .context("Invalid value for realtime_enabled. Use 'true' or 'false'.")?;
        }
        "data_dir" => config.data_dir = value.into(),
        "queue_backend" => config.queue_backend = value.parse().map_err(|e: String| anyhow!(e))?,
        "max_tokens" => config.max_tokens = number(key, value)?,
        "refill_rate_per_interval" => config.refill_rate_per_interval = number(key, value)?,
        "refill_interval_ms" => config.refill_interval_ms = number(key, value)?,
        "max_queue_size" => config.max_queue_size = number(key, value)?,
        "max_queue_age_ms" => config.max_queue_age_ms = number(key, value)?,
        "heartbeat_interval_ms" => config.heartbeat_interval_ms = number(key, value)?,
        "max_reconnect_attempts" => config.max_reconnect_attempts = number(key, value)?,
        "reconnect_base_delay_ms" => config.reconnect_base_delay_ms = number(key, value)?,
        "max_reconnect_delay_ms" => config.max_reconnect_delay_ms = number(key, value)?,
        "retry_attempts" => config.retry_attempts = number(key, value)?,
        "retry_base_delay_ms" => config.retry_base_delay_ms = number(key, value)?,
        "max_consecutive_failures" => config.max_consecutive_failures = number(key, value)?,
        "request_timeout_ms" => config.request_timeout_ms = number(key, value)?,
        "probe_interval_ms" => config.probe_interval_ms = number(key, value)?,
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| anyhow!("Invalid value for {}: {}", key, e))
}
