//! Filesystem change driven certificate request handling

use std::path::PathBuf;
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::is_supported_descriptor;
use crate::services::manager::CertificateManager;

/// Start watching every request directory of `manager`
///
/// Each data write to a supported descriptor is handled immediately. A
/// directory that cannot be watched is logged and skipped.
pub fn start_certificate_watcher(
    manager: Arc<CertificateManager>,
    shutdown: CancellationToken,
) -> notify::Result<JoinHandle<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

    for dir in manager.request_dirs() {
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => info!("Watching certificate requests in {:?}", dir),
            Err(e) => error!("Failed to watch {:?}: {}", dir, e),
        }
    }

    Ok(tokio::spawn(async move {
        // Dropping the watcher closes the event stream
        let _watcher = watcher;

        loop {
            let res = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = rx.recv() => match res {
                    Some(res) => res,
                    None => break,
                },
            };

            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Watch error: {}", e);
                    continue;
                }
            };

            for path in changed_descriptors(&event) {
                debug!("Certificate request {:?} modified", path);
                let manager = manager.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || {
                    manager.handle_certificate_request_file(&path)
                })
                .await
                {
                    error!("Certificate request task failed: {}", e);
                }
            }
        }

        info!("Certificate watcher stopped");
    }))
}

/// Supported descriptors whose data was written by `event`
pub fn changed_descriptors(event: &Event) -> Vec<PathBuf> {
    if !matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
    ) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| is_supported_descriptor(path))
        .cloned()
        .collect()
}
