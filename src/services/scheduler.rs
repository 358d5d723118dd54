//! Periodic certificate request scan

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::services::manager::CertificateManager;

/// Start the periodic scan task
///
/// A first pass runs immediately, then one pass per `period`. Passes run on
/// the blocking pool; a pass in flight when `shutdown` fires is completed.
pub fn start_certificate_scheduler(
    manager: Arc<CertificateManager>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Certificate scheduler started (interval: {}s)",
            period.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let manager = manager.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || manager.load_certificate_requests()).await
            {
                error!("Certificate scan task failed: {}", e);
            }
        }

        info!("Certificate scheduler stopped");
    })
}
