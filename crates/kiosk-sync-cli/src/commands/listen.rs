//! Listen command handler

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

use kiosk_sync_core::{ChannelMessage, MessageType};

use crate::output::Output;

/// Connect the push channel and print messages until stopped
///
/// Queued operations are drained whenever connectivity returns while
/// listening.
pub async fn listen(config_path: &Path, seconds: Option<u64>, output: &Output) -> Result<()> {
    let mut services = super::open_services(config_path)?;

    if !services.config.realtime_enabled {
        bail!(
            "Realtime updates are disabled.\n\
             Enable them with: kiosk-sync config set realtime_enabled true"
        );
    }

    let mut subscriptions = Vec::new();
    for kind in [
        MessageType::MenuUpdate,
        MessageType::OrderStatus,
        MessageType::AvailabilityUpdate,
    ] {
        let output = *output;
        subscriptions.push(services.channel.on(kind, move |data| {
            output.print_message(&ChannelMessage::new(kind, data.clone()));
        }));
    }

    services.probe_now().await;
    services.spawn_background();
    services.connect_realtime();

    let mut status = services.channel.subscribe_status();
    let wait = async {
        loop {
            if status.changed().await.is_err() {
                break;
            }
            let current = *status.borrow_and_update();
            info!("Push channel {}", current);
        }
    };

    match seconds {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
                _ = wait => {}
            }
        }
        None => {
            output.message("Listening for push updates, Ctrl-C to stop.");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = wait => {}
            }
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    services.shutdown().await;
    Ok(())
}
