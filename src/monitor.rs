use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::refetch::{CacheRefresher, RefetchPlan};
use crate::session::SessionState;
use crate::versions::VersionReconciler;

const VERSION_MONITOR_MIN_INTERVAL_SECS: u64 = 10;

/// Poll entity versions on a fixed cadence and refetch stale collections.
///
/// Runs until `shutdown` is cancelled. Iterations are skipped while the
/// session is cleared.
pub fn start_version_monitor(
    reconciler: VersionReconciler,
    refresher: CacheRefresher,
    interval: Duration,
    min_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let cadence = interval.max(Duration::from_secs(VERSION_MONITOR_MIN_INTERVAL_SECS));

    tokio::spawn(async move {
        info!(interval_secs = cadence.as_secs(), "Starting version monitor");

        loop {
            if reconciler.client().session().state() == SessionState::Active {
                let outcome = reconciler.refresh(false, min_interval).await;
                if outcome.changed.is_empty() {
                    debug!(fetched = outcome.fetched, "version monitor: nothing changed");
                } else {
                    let plan = RefetchPlan::from_changed(&outcome.changed);
                    let report = refresher.apply(&plan).await;
                    if !report.failed.is_empty() {
                        warn!(
                            failed = report.failed.len(),
                            refreshed = report.refreshed.len(),
                            "version monitor: some collections failed to refresh"
                        );
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Version monitor stopped");
                    break;
                }
                _ = tokio::time::sleep(cadence) => {}
            }
        }
    })
}
