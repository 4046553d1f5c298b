//! Status command handler

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use kiosk_sync_core::OperationKind;

use crate::output::{age, Output, OutputFormat};

/// Show connectivity, queue and configuration status
pub async fn show(config_path: &Path, output: &Output) -> Result<()> {
    let services = super::open_services(config_path)?;
    let state = services.probe_now().await;

    let config = &services.config;
    let queue = &services.queue;
    let head = queue.peek();
    let orders = OperationKind::Order.endpoint();
    let feedback = OperationKind::Feedback.endpoint();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "base_url": config.base_url,
                    "connectivity": state,
                    "realtime": {
                        "enabled": config.realtime_enabled,
                        "url": config.realtime_url(),
                    },
                    "queue": {
                        "length": queue.len(),
                        "max_size": queue.limits().max_size,
                        "durable": queue.is_durable(),
                        "backend": config.queue_backend,
                        "head": head,
                    },
                    "tokens": {
                        orders: services.limiter.remaining_tokens(orders),
                        feedback: services.limiter.remaining_tokens(feedback),
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{} {}", state, queue.len());
        }
        OutputFormat::Human => {
            println!("Kiosk Sync Status");
            println!("=================");
            println!();
            println!("Backend:");
            println!(
                "  URL:          {}",
                config.base_url.as_deref().unwrap_or("(not set)")
            );
            println!("  Connectivity: {}", state);
            println!();
            println!("Realtime:");
            if config.realtime_enabled {
                println!(
                    "  URL: {}",
                    config.realtime_url().unwrap_or_else(|| "(not set)".to_string())
                );
            } else {
                println!("  Status: disabled");
            }
            println!();
            println!("Offline queue:");
            println!(
                "  Pending: {} / {}",
                queue.len(),
                queue.limits().max_size
            );
            println!(
                "  Storage: {:?}{}",
                config.queue_backend,
                if queue.is_durable() {
                    ""
                } else {
                    " (not durable!)"
                }
            );
            if let Some(ref op) = head {
                println!(
                    "  Oldest:  {} {} ({} old)",
                    op.kind,
                    op.id,
                    age(op.enqueued_at, Utc::now())
                );
            }
            println!();
            println!("Rate limits (tokens left):");
            println!("  {:<10} {}", orders, services.limiter.remaining_tokens(orders));
            println!("  {:<10} {}", feedback, services.limiter.remaining_tokens(feedback));
        }
    }

    services.shutdown().await;
    Ok(())
}
