use std::time::SystemTime;

use library::LibraryStats;
use tracing::{info, warn};

use crate::state::{AppState, LibraryStatus};
use crate::watch::configure_watcher;

/// Initial scan at startup. The watcher is attached once the first
/// snapshot has been committed, whether or not the scan succeeded.
pub fn start_index(state: AppState) {
    state.set_status(LibraryStatus::Scanning {
        started: SystemTime::now(),
    });
    *state.watcher.write() = None;

    tokio::spawn(async move {
        if run_rescan(&state).await.is_some() {
            let stats = state.library.stats();
            info!(
                "Library ready: {} artists, {} albums, {} tracks",
                stats.artists, stats.albums, stats.tracks
            );
        }
        configure_watcher(&state);
    });
}

/// Manual rescan requested over HTTP.
pub fn start_rescan(state: AppState) {
    state.set_status(LibraryStatus::Scanning {
        started: SystemTime::now(),
    });
    tokio::spawn(async move {
        run_rescan(&state).await;
    });
}

/// Runs a full rescan on the blocking pool and records the outcome.
///
/// A failed scan keeps the previous snapshot; only the status changes.
pub async fn run_rescan(state: &AppState) -> Option<LibraryStats> {
    let library = state.library.clone();
    match tokio::task::spawn_blocking(move || library.rescan()).await {
        Ok(Ok(stats)) => {
            state.set_status(LibraryStatus::Ready(stats.clone()));
            Some(stats)
        }
        Ok(Err(err)) => {
            warn!("Library scan failed: {}", err);
            state.set_status(LibraryStatus::Error(err.to_string()));
            None
        }
        Err(err) => {
            warn!("Library scan join error: {}", err);
            state.set_status(LibraryStatus::Error(err.to_string()));
            None
        }
    }
}

/// Refreshes the reported counts after an operation that rescanned inside
/// the library (upload, reassign). When that rescan failed the current
/// status is left alone.
pub fn refresh_status(state: &AppState, reindexed: bool) {
    if !reindexed {
        warn!("Index was not refreshed; keeping the previous library status");
        return;
    }
    state.set_status(LibraryStatus::Ready(state.library.stats()));
}
