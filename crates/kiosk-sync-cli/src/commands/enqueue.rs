//! Enqueue command handler

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use kiosk_sync_core::OperationKind;

use crate::output::{Output, OutputFormat};

/// Append an operation to the offline queue
///
/// Nothing is sent here; `drain` (or a reconnect) delivers it.
pub fn enqueue(config_path: &Path, kind: OperationKind, payload: &str, output: &Output) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;

    let services = super::open_services(config_path)?;
    let id = services.queue.enqueue(kind, payload);
    let pending = services.queue.len();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "id": id,
                    "kind": kind,
                    "pending": pending,
                    "durable": services.queue.is_durable()
                })
            );
        }
        OutputFormat::Quiet => println!("{}", id),
        OutputFormat::Human => {
            output.success(&format!("Queued {} {} ({} pending)", kind, id, pending));
            if !services.queue.is_durable() {
                println!("Warning: the queue could not be saved and will not survive a restart");
            }
        }
    }

    Ok(())
}
