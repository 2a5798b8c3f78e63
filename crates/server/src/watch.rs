use std::future::Future;
use std::path::Path;
use std::time::Duration;

use common::has_extension;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scan::run_rescan;
use crate::state::AppState;

pub fn configure_watcher(state: &AppState) {
    if !state.config.watch_music {
        info!("Watcher disabled (watch_music=false)");
        *state.watcher.write() = None;
        return;
    }

    let root = state.library.root().to_path_buf();
    let debounce = state.config.watch_debounce();
    match setup_watcher(state.clone(), &root, debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} for changes (debounce {}ms)",
                root.display(),
                debounce.as_millis()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    state: AppState,
    root: &Path,
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(err) => warn!("Watch error: {}", err),
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;

    let extensions = state.library.extensions().to_vec();
    tokio::spawn(async move {
        coalesce_events(rx, debounce, extensions, move || {
            let state = state.clone();
            async move {
                info!("Filesystem changed, rescanning");
                run_rescan(&state).await;
            }
        })
        .await;
    });

    Ok(watcher)
}

/// Collapses bursts of relevant events into one `on_settled` call per quiet
/// period of `debounce`.
///
/// The quiet period restarts on every relevant event. `on_settled` is
/// awaited inline, so at most one rescan is in flight from this loop and
/// events arriving meanwhile open the next window. A pending burst still
/// fires once if the channel closes.
pub(crate) async fn coalesce_events<F, Fut>(
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
    extensions: Vec<String>,
    mut on_settled: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        match rx.recv().await {
            Some(event) if is_relevant_event(&event, &extensions) => {}
            Some(_) => continue,
            None => return,
        }

        let quiet = tokio::time::sleep(debounce);
        tokio::pin!(quiet);
        let mut closed = false;
        let mut coalesced = 1usize;
        loop {
            tokio::select! {
                _ = &mut quiet => break,
                next = rx.recv() => match next {
                    Some(event) => {
                        if is_relevant_event(&event, &extensions) {
                            coalesced += 1;
                            quiet.as_mut().reset(Instant::now() + debounce);
                        }
                    }
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        debug!("Coalesced {} filesystem events", coalesced);
        on_settled().await;
        if closed {
            return;
        }
    }
}

/// Directory events and events on supported audio files count. Paths
/// without an extension are treated as directories since a removed
/// directory can no longer be checked.
pub(crate) fn is_relevant_event(event: &Event, extensions: &[String]) -> bool {
    if event.need_rescan() {
        return true;
    }
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        path.is_dir() || path.extension().is_none() || has_extension(path, extensions)
    })
}
