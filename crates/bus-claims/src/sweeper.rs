use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::ClaimStore;

/// Background sweeper: removes expired claim rows once per second.
///
/// Mirrors `bus_active_mode::reaper::run`'s tick-loop shape. Expired
/// claims are also pruned lazily inside `try_claim`, so this task is a
/// backstop for channels that go quiet — it keeps the claims table from
/// accumulating rows nobody will ever look at again.
pub async fn run(store: Arc<ClaimStore>, shutdown: CancellationToken) {
    info!("claim sweeper started");
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.sweep_expired() {
                    Ok(n) if n > 0 => info!(count = n, "swept expired claims"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "claim sweep failed"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("claim sweeper shutting down");
                break;
            }
        }
    }
}
