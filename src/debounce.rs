//! Keyed debouncing of async actions.
//!
//! Every call to [`Debouncer::debounce`] with a given key cancels the pending
//! timer for that key and starts a new one, so a burst of calls collapses into
//! a single execution timed from the last call. Distinct keys never interact.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<String, Pending>,
}

/// Per-key delayed task map with restart-on-duplicate-key semantics.
///
/// Safe to call from any thread: timers are spawned onto the runtime captured
/// at construction, which lets filesystem watcher callbacks schedule work.
#[derive(Clone)]
pub struct Debouncer {
    runtime: Handle,
    timers: Arc<Mutex<Timers>>,
}

impl Debouncer {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            timers: Arc::new(Mutex::new(Timers::default())),
        }
    }

    /// Run `action` once `delay` has elapsed without another call for `key`.
    pub fn debounce<F>(&self, key: impl Into<String>, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let mut timers = self.timers.lock();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let shared = Arc::clone(&self.timers);
        let task_key = key.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = shared.lock();
                match timers.pending.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        timers.pending.remove(&task_key);
                    }
                    // superseded between waking and taking the lock
                    _ => return,
                }
            }
            action.await;
        });

        if let Some(previous) = timers.pending.insert(key, Pending { generation, task }) {
            trace!(generation, "debounce restarted");
            previous.task.abort();
        }
    }

    /// Drop the pending action for `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().pending.remove(key) {
            Some(p) => {
                p.task.abort();
                true
            }
            None => false,
        }
    }

    /// Number of keys with a timer still running.
    pub fn pending(&self) -> usize {
        self.timers.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_execution() {
        let debouncer = Debouncer::new(Handle::current());
        let counter = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(80);

        for _ in 0..10 {
            debouncer.debounce("dir", delay, counter_action(&counter));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0, "nothing runs during the burst");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let debouncer = Debouncer::new(Handle::current());
        let counter = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(30);

        debouncer.debounce("a", delay, counter_action(&counter));
        debouncer.debounce("b", delay, counter_action(&counter));
        debouncer.debounce("a", delay, counter_action(&counter));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timer_restarts_from_last_call() {
        let debouncer = Debouncer::new(Handle::current());
        let counter = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(150);

        debouncer.debounce("k", delay, counter_action(&counter));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.debounce("k", delay, counter_action(&counter));
        tokio::time::sleep(Duration::from_millis(100)).await;
        // 200ms after the first call, only 100ms after the last
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_action() {
        let debouncer = Debouncer::new(Handle::current());
        let counter = Arc::new(AtomicUsize::new(0));

        debouncer.debounce("k", Duration::from_millis(30), counter_action(&counter));
        assert!(debouncer.cancel("k"));
        assert!(!debouncer.cancel("k"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
