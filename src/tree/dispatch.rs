//! Single logical context for every tree mutation.
//!
//! Jobs run one at a time, in submission order, on one long-lived task. Child
//! lists, root lists, disposal and notifications only ever change inside a
//! job, so observers see a consistent sequence without taking locks
//! across await points.

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the dispatcher loop on `runtime`. It stops once every handle is dropped.
    pub fn spawn(runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            trace!("dispatcher stopped");
        });
        Self { tx }
    }

    /// Run `job` on the dispatcher and wait for its result.
    ///
    /// `None` if the dispatcher has stopped.
    pub async fn run<R, F>(&self, job: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = done_tx.send(job());
        });
        self.tx.send(job).ok()?;
        done_rx.await.ok()
    }

    /// Queue `job` without waiting for it.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            trace!("dispatcher stopped, job dropped");
        }
    }
}
