//! Filesystem watcher feeding registry reloads.
//!
//! Uses the platform's native notification backend with a per-path debounce
//! window so editor write bursts collapse to a single reload. Roots on
//! overlay filesystems (detected by path prefix) fall back to an mtime
//! polling loop, where inotify events are unreliable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ConfigError, ConfigResult};

/// Tuning knobs for the watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Per-path window within which repeated events collapse.
    pub debounce: Duration,
    /// Scan period for the polling fallback.
    pub poll_interval: Duration,
    /// Path prefixes treated as overlay mounts that need polling.
    pub overlay_prefixes: Vec<PathBuf>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            poll_interval: Duration::from_secs(3),
            overlay_prefixes: vec![PathBuf::from("/mnt")],
        }
    }
}

/// Debounced stream of changed `.json` paths under a watched root.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<PathBuf>,
    _watcher: Option<RecommendedWatcher>,
}

impl ChangeStream {
    /// Next changed path, `None` when the watcher shut down.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }
}

/// Start watching a directory tree for `.json` changes.
///
/// # Errors
///
/// Returns [`ConfigError::WatcherSetup`] when the native watcher cannot be
/// established; the polling fallback never fails to start.
pub fn spawn(root: &Path, options: &WatcherOptions) -> ConfigResult<ChangeStream> {
    if is_overlay_path(root, &options.overlay_prefixes) {
        debug!(root = %root.display(), "overlay filesystem detected; polling for changes");
        return Ok(spawn_polling(root.to_path_buf(), options.poll_interval));
    }

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                if event.kind.is_access() {
                    return;
                }
                for path in event.paths {
                    if is_json(&path) {
                        let _ = raw_tx.send(path);
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "filesystem watcher error");
            }
        }
    })
    .map_err(|err| ConfigError::WatcherSetup {
        detail: err.to_string(),
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|err| ConfigError::WatcherSetup {
            detail: err.to_string(),
        })?;

    let rx = spawn_debouncer(raw_rx, options.debounce);
    Ok(ChangeStream {
        rx,
        _watcher: Some(watcher),
    })
}

/// Whether a root sits on a mount that needs the polling fallback.
#[must_use]
pub fn is_overlay_path(root: &Path, prefixes: &[PathBuf]) -> bool {
    prefixes.iter().any(|prefix| root.starts_with(prefix))
}

/// Collapse bursts of raw events into one emission per path per window.
pub(crate) fn spawn_debouncer(
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
) -> mpsc::UnboundedReceiver<PathBuf> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let tick_period = (debounce / 4).max(Duration::from_millis(10));
        let mut ticker = interval(tick_period);
        loop {
            tokio::select! {
                raw = raw_rx.recv() => {
                    match raw {
                        Some(path) => {
                            pending.insert(path, Instant::now());
                        }
                        None => {
                            // Source closed; flush whatever is pending and stop.
                            for (path, _) in pending.drain() {
                                let _ = tx.send(path);
                            }
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, last)| now.duration_since(**last) >= debounce)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        let _ = tx.send(path);
                    }
                }
            }
        }
    });
    rx
}

fn spawn_polling(root: PathBuf, poll_interval: Duration) -> ChangeStream {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut previous = scan_mtimes(&root);
        let mut ticker = interval(poll_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let current = scan_mtimes(&root);
            for (path, mtime) in &current {
                if previous.get(path) != Some(mtime) && tx.send(path.clone()).is_err() {
                    return;
                }
            }
            for path in previous.keys() {
                if !current.contains_key(path) && tx.send(path.clone()).is_err() {
                    return;
                }
            }
            previous = current;
        }
    });
    ChangeStream { rx, _watcher: None }
}

fn scan_mtimes(root: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut mtimes = HashMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !is_json(path) {
            continue;
        }
        if let Ok(metadata) = entry.metadata()
            && let Ok(modified) = metadata.modified()
        {
            mtimes.insert(path.to_path_buf(), modified);
        }
    }
    mtimes
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debouncer_collapses_bursts_per_path() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut rx = spawn_debouncer(raw_rx, Duration::from_millis(50));

        let path = PathBuf::from("endpoints/SQL/Products/entity.json");
        for _ in 0..5 {
            raw_tx.send(path.clone()).expect("send raw");
        }

        let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("within deadline")
            .expect("one emission");
        assert_eq!(first, path);

        // The burst must not produce a second emission.
        let extra = tokio::time::timeout(Duration::from_millis(120), rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn debouncer_keeps_distinct_paths_separate() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut rx = spawn_debouncer(raw_rx, Duration::from_millis(30));

        let a = PathBuf::from("a/entity.json");
        let b = PathBuf::from("b/entity.json");
        raw_tx.send(a.clone()).expect("send a");
        raw_tx.send(b.clone()).expect("send b");

        let mut seen = Vec::new();
        for _ in 0..2 {
            let path = tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .expect("within deadline")
                .expect("emission");
            seen.push(path);
        }
        assert!(seen.contains(&a));
        assert!(seen.contains(&b));
    }

    #[test]
    fn overlay_detection_uses_prefixes() {
        let prefixes = vec![PathBuf::from("/mnt")];
        assert!(is_overlay_path(Path::new("/mnt/share/endpoints"), &prefixes));
        assert!(!is_overlay_path(Path::new("/srv/endpoints"), &prefixes));
    }

    #[test]
    fn json_filter_ignores_other_files() {
        assert!(is_json(Path::new("entity.json")));
        assert!(is_json(Path::new("ENTITY.JSON")));
        assert!(!is_json(Path::new("entity.yaml")));
        assert!(!is_json(Path::new("entity")));
    }
}
