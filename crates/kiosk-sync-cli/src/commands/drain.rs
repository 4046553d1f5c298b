//! Drain command handler

use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::output::Output;

/// Probe the backend and run one drain pass
pub async fn drain(config_path: &Path, output: &Output) -> Result<()> {
    let services = super::open_services(config_path)?;

    if services.queue.is_empty() {
        output.message("Offline queue is empty, nothing to sync.");
        return Ok(());
    }

    let state = services.probe_now().await;
    info!("Backend is {}", state);

    let report = services.sync.start().await;
    output.print_report(&report);

    services.shutdown().await;
    Ok(())
}
