//! Command handlers

pub mod config;
pub mod drain;
pub mod enqueue;
pub mod listen;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use kiosk_sync_core::{Config, LogNotifier, Services};

/// Load the configuration and assemble the networking layer
pub(crate) fn open_services(config_path: &Path) -> Result<Services> {
    let config = Config::load_from_path(&config_path.to_path_buf())
        .context("Failed to load configuration")?;
    Services::build(config, Arc::new(LogNotifier))
}
