//! Filesystem watch over `config_dir`. Kept separate from `ConfigStore`:
//! this module only detects that something changed and signals a
//! channel — it never touches `ConfigStore` directly, so the reload policy
//! (validate-or-keep-old) stays in one place.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use nylon_core::error::NylonError;
use std::path::Path;
use std::sync::mpsc::sync_channel;
use std::time::Duration;

/// Watches `config_dir` for filesystem events and calls `on_change` at most
/// once per `debounce` window, coalescing bursts of writes (editors often
/// write a file as rename+create) into a single reload attempt.
pub fn watch(
    config_dir: &Path,
    debounce: Duration,
    on_change: impl Fn() + Send + 'static,
) -> Result<RecommendedWatcher, NylonError> {
    let (raw_tx, raw_rx) = sync_channel::<()>(1);
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| {
            if res.is_ok() {
                let _ = raw_tx.try_send(());
            }
        })
        .map_err(|e| NylonError::ConfigError(format!("failed to start config watcher: {e}")))?;

    watcher
        .watch(config_dir, RecursiveMode::NonRecursive)
        .map_err(|e| NylonError::ConfigError(format!("failed to watch {}: {e}", config_dir.display())))?;

    std::thread::spawn(move || debounce_loop(raw_rx, debounce, on_change));

    Ok(watcher)
}

fn debounce_loop(rx: std::sync::mpsc::Receiver<()>, debounce: Duration, on_change: impl Fn()) {
    while rx.recv().is_ok() {
        // Drain anything else that arrived while we were idle, then wait out
        // the debounce window before folding in further bursts.
        loop {
            std::thread::sleep(debounce);
            if rx.try_recv().is_err() {
                break;
            }
        }
        on_change();
    }
}
