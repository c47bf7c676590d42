pub mod event;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use event::classify_event;

/// Receiver of change notifications for one watched directory.
pub trait ChangeSink: Send + Sync {
    /// `path` is an entry of the watched directory that was created,
    /// modified, deleted or renamed.
    fn on_change(&self, path: &Path);
}

type Sinks = DashMap<PathBuf, Vec<(u64, Weak<dyn ChangeSink>)>>;

/// One OS watcher shared by every subscribed directory.
///
/// Each directory is watched non-recursively, once, however many sinks
/// subscribe to it. Sinks are held weakly: a dropped node stops receiving
/// events even before its subscription is released.
pub struct WatchHub {
    debouncer: Mutex<Debouncer<RecommendedWatcher>>,
    sinks: Arc<Sinks>,
    next_token: AtomicU64,
}

/// Keeps a directory watched. Dropping it releases the watch.
pub struct WatchSubscription {
    hub: Weak<WatchHub>,
    dir: PathBuf,
    token: u64,
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("dir", &self.dir)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.dir, self.token);
        }
    }
}

impl WatchHub {
    /// Start the shared watcher. `latency` coalesces raw OS events per path
    /// before they are dispatched; per-directory quiescence is handled by
    /// the subscribers.
    ///
    /// Events are dispatched from a dedicated thread, so sinks must not block.
    pub fn start(latency: Duration) -> anyhow::Result<Arc<Self>> {
        let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();

        let debouncer = new_debouncer(latency, move |res| {
            let _ = std_tx.send(res);
        })?;

        let sinks: Arc<Sinks> = Arc::new(DashMap::new());
        let hub = Arc::new(Self {
            debouncer: Mutex::new(debouncer),
            sinks: Arc::clone(&sinks),
            next_token: AtomicU64::new(1),
        });

        // Bridge: classify and fan out until the debouncer (and its sender) is dropped
        let weak_hub = Arc::downgrade(&hub);
        std::thread::Builder::new()
            .name("workspace-files-watch".into())
            .spawn(move || {
                while let Ok(result) = std_rx.recv() {
                    match result {
                        Ok(events) => {
                            for debounced in events {
                                dispatch(&sinks, &debounced.path);
                            }
                        }
                        Err(err) => {
                            warn!(kind = ?err.kind, paths = ?err.paths, "watcher error, re-subscribing");
                            if let Some(hub) = weak_hub.upgrade() {
                                hub.rewatch(&err.paths);
                            }
                        }
                    }
                }
                trace!("watch bridge stopped");
            })?;

        Ok(hub)
    }

    /// Watch `dir` on behalf of `sink`. Returns `None` if the OS refused the
    /// watch (missing directory, watch limit); the caller simply stays unwatched.
    pub fn subscribe(
        self: &Arc<Self>,
        dir: &Path,
        sink: Weak<dyn ChangeSink>,
    ) -> Option<WatchSubscription> {
        let mut debouncer = self.debouncer.lock();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let already_watched = self.sinks.get(dir).is_some_and(|s| !s.is_empty());
        if !already_watched
            && let Err(err) = debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)
        {
            debug!(dir = %dir.display(), %err, "failed to watch directory");
            return None;
        }

        self.sinks
            .entry(dir.to_path_buf())
            .or_default()
            .push((token, sink));
        trace!(dir = %dir.display(), token, "subscribed");

        Some(WatchSubscription {
            hub: Arc::downgrade(self),
            dir: dir.to_path_buf(),
            token,
        })
    }

    /// Number of directories currently watched.
    pub fn watched_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.sinks.contains_key(dir)
    }

    fn unsubscribe(&self, dir: &Path, token: u64) {
        let mut debouncer = self.debouncer.lock();

        let now_empty = match self.sinks.get_mut(dir) {
            Some(mut entry) => {
                entry.retain(|(t, _)| *t != token);
                entry.is_empty()
            }
            None => return,
        };

        if now_empty {
            self.sinks.remove(dir);
            if let Err(err) = debouncer.watcher().unwatch(dir) {
                // usually the directory is already gone
                trace!(dir = %dir.display(), %err, "unwatch failed");
            }
            trace!(dir = %dir.display(), "unwatched");
        }
    }

    /// Disable and re-enable the watches for `paths`, or for every watched
    /// directory when the error named none. Failures are swallowed.
    fn rewatch(&self, paths: &[PathBuf]) {
        let mut debouncer = self.debouncer.lock();
        let dirs: Vec<PathBuf> = if paths.is_empty() {
            self.sinks.iter().map(|e| e.key().clone()).collect()
        } else {
            paths
                .iter()
                .filter(|p| self.sinks.contains_key(p.as_path()))
                .cloned()
                .collect()
        };

        for dir in dirs {
            let _ = debouncer.watcher().unwatch(&dir);
            if let Err(err) = debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive) {
                debug!(dir = %dir.display(), %err, "re-subscribe failed");
            }
        }
    }
}

fn dispatch(sinks: &Sinks, path: &Path) {
    let Some(event) = classify_event(path) else {
        return;
    };

    // copy the sinks out so no map lock is held while they run
    let targets: Vec<Weak<dyn ChangeSink>> = match sinks.get(&event.dir) {
        Some(entry) => entry.iter().map(|(_, sink)| Weak::clone(sink)).collect(),
        None => return,
    };

    for sink in targets {
        if let Some(sink) = sink.upgrade() {
            sink.on_change(&event.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;

    struct ChannelSink(Mutex<mpsc::Sender<PathBuf>>);

    impl ChangeSink for ChannelSink {
        fn on_change(&self, path: &Path) {
            let _ = self.0.lock().send(path.to_path_buf());
        }
    }

    fn sink() -> (Arc<dyn ChangeSink>, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelSink(Mutex::new(tx))), rx)
    }

    #[test]
    fn test_change_reaches_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let hub = WatchHub::start(Duration::from_millis(20)).unwrap();
        let (sink, rx) = sink();

        let _sub = hub.subscribe(dir.path(), Arc::downgrade(&sink)).unwrap();
        fs::write(dir.path().join("new.txt"), "x").unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.file_name().unwrap(), "new.txt");
    }

    #[test]
    fn test_reserved_changes_are_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let hub = WatchHub::start(Duration::from_millis(20)).unwrap();
        let (sink, rx) = sink();

        let _sub = hub.subscribe(dir.path(), Arc::downgrade(&sink)).unwrap();
        fs::write(dir.path().join("~lock"), "x").unwrap();
        fs::write(dir.path().join("kept.txt"), "x").unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.file_name().unwrap(), "kept.txt");
    }

    #[test]
    fn test_shared_directory_unwatched_after_last_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let hub = WatchHub::start(Duration::from_millis(20)).unwrap();
        let (first, _rx1) = sink();
        let (second, _rx2) = sink();

        let a = hub.subscribe(dir.path(), Arc::downgrade(&first)).unwrap();
        let b = hub.subscribe(dir.path(), Arc::downgrade(&second)).unwrap();
        assert_eq!(hub.watched_count(), 1);

        drop(a);
        assert!(hub.is_watched(dir.path()));
        drop(b);
        assert!(!hub.is_watched(dir.path()));
    }

    #[test]
    fn test_missing_directory_is_not_subscribed() {
        let dir = tempfile::tempdir().unwrap();
        let hub = WatchHub::start(Duration::from_millis(20)).unwrap();
        let (sink, _rx) = sink();
        assert!(hub.subscribe(&dir.path().join("gone"), Arc::downgrade(&sink)).is_none());
        assert_eq!(hub.watched_count(), 0);
    }
}
