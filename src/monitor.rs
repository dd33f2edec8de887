use std::time::Duration;

use execution_queue_shutdown_signal::ShutdownSignal;
use tracing::{debug, warn};

use crate::WorkerUtils;

/// Keeps this worker's row in `worker_heartbeats` fresh until shutdown.
///
/// Failures are logged and retried on the next tick; a missed touch only
/// makes the fleet look idle in health counts.
pub(crate) async fn fleet_heartbeat(
    utils: &WorkerUtils,
    worker_id: &str,
    lane: Option<&str>,
    interval: Duration,
    mut shutdown_signal: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick fires immediately, registration already touched the row
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = utils.touch_worker(worker_id, lane).await {
                    warn!(error = %e, worker_id, "Failed to record worker heartbeat");
                }
            }
            _ = &mut shutdown_signal => break,
        }
    }

    debug!(worker_id, "Fleet heartbeat stopped");
}

/// Periodically hands abandoned leases back to the queue until shutdown.
pub(crate) async fn lease_sweeper(
    utils: &WorkerUtils,
    interval: Duration,
    mut shutdown_signal: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = utils.reclaim_abandoned().await {
                    warn!(error = %e, "Lease sweep failed");
                }
            }
            _ = &mut shutdown_signal => break,
        }
    }

    debug!("Lease sweeper stopped");
}
