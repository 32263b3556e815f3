use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::SyncReconciler;

/// Background task that periodically pushes unsynced and failed invoices to
/// the ledger. Runs until the task is aborted.
pub async fn run_retry_loop(reconciler: Arc<SyncReconciler>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let attempted = reconciler.sync_pending().await;
        if attempted > 0 {
            let dashboard = reconciler.dashboard();
            info!(
                "ledger sync pass: {attempted} attempted, {} synced, {} failed",
                dashboard.successful, dashboard.failed
            );
        } else {
            debug!("ledger sync pass: nothing pending");
        }
    }
}
