//! Best-effort reconnect sweep run once at process start.

use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ConnectOutcome, ConnectionManager};
use crate::config::ReconnectConfig;
use crate::repositories::DeviceRepository;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub candidates: usize,
    pub reconnected: usize,
    pub failed: usize,
}

/// Re-establish sessions for every device last recorded as connected.
///
/// Devices that fail, or that now need pairing again, are downgraded to
/// disconnected. Nothing is retried.
pub async fn reconnect_sweep(
    manager: ConnectionManager,
    devices: DeviceRepository,
    config: ReconnectConfig,
    shutdown: CancellationToken,
) -> SweepStats {
    if !config.enabled {
        return SweepStats::default();
    }

    tokio::select! {
        _ = shutdown.cancelled() => return SweepStats::default(),
        _ = tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)) => {}
    }

    let candidates = match devices.connected_devices().await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(error = %err, "Reconnect sweep could not list devices");
            return SweepStats::default();
        }
    };

    let mut stats = SweepStats {
        candidates: candidates.len(),
        ..SweepStats::default()
    };
    if candidates.is_empty() {
        return stats;
    }
    info!(candidates = stats.candidates, "Starting reconnect sweep");

    let results: Vec<bool> = stream::iter(candidates)
        .map(|device| {
            let manager = manager.clone();
            let devices = devices.clone();
            let shutdown = shutdown.clone();
            async move {
                if shutdown.is_cancelled() {
                    return false;
                }
                match manager.connect(device.tenant_id).await {
                    Ok(ConnectOutcome::Connected { .. }) => true,
                    Ok(ConnectOutcome::PairingRequired { .. }) => {
                        warn!(tenant_id = %device.tenant_id, "Stored credentials no longer valid; pairing required");
                        if let Err(err) = devices.mark_disconnected(device.tenant_id).await {
                            warn!(tenant_id = %device.tenant_id, error = %err, "Failed to downgrade device");
                        }
                        false
                    }
                    // The manager already downgraded the durable status.
                    Err(err) => {
                        warn!(tenant_id = %device.tenant_id, error = %err, "Reconnect failed");
                        false
                    }
                }
            }
        })
        .buffer_unordered(config.concurrency.max(1) as usize)
        .collect()
        .await;

    stats.reconnected = results.iter().filter(|ok| **ok).count();
    stats.failed = results.len() - stats.reconnected;
    info!(
        candidates = stats.candidates,
        reconnected = stats.reconnected,
        failed = stats.failed,
        "Reconnect sweep finished"
    );
    stats
}
