use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::ActiveModeRegistry;

/// Background sweeper: evicts timed-out channels once per second.
///
/// Mirrors `skynet_scheduler::engine::SchedulerEngine::run`'s tick-loop
/// shape, but uses a `CancellationToken` for shutdown instead of a
/// `watch::Receiver<bool>`. This workspace standardises on
/// `CancellationToken` for every background loop since it composes
/// cleanly with the per-channel dispatcher cancellation used elsewhere.
pub async fn run(
    registry: Arc<ActiveModeRegistry>,
    timeout_minutes: u64,
    shutdown: CancellationToken,
) {
    info!("active-mode reaper started");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match registry.reap_expired(timeout_minutes) {
                    Ok(evicted) if !evicted.is_empty() => {
                        info!(count = evicted.len(), channels = ?evicted, "reaped stale active-mode channels");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "active-mode reap failed"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("active-mode reaper shutting down");
                break;
            }
        }
    }
}
