//! Live tree of workspace files.
//!
//! Nodes are lazily materialized: a directory enumerates its entries the first
//! time its children are requested, then stays in sync through a watch
//! subscription and debounced reconciliation. Every mutation of the tree goes
//! through the [`Dispatcher`](dispatch::Dispatcher); readers only ever see
//! whole child lists.

pub mod dispatch;
pub mod event;
pub mod node;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::warn;

pub use dispatch::Dispatcher;
pub use event::{NodeId, TreeChange, TreeEvent};
pub use node::{Children, NodeKind, ReconcileOutcome, TreeNode};

use crate::config::WorkspaceConfig;
use crate::debounce::Debouncer;
use crate::filter::{FilterEngine, GlobFilter, IgnoreCache, RepoRootCache};
use crate::status::{GitStatusCommand, StatusCache, StatusSource};
use crate::watcher::WatchHub;

/// Coalescing applied by the OS watcher before events reach the nodes.
const WATCH_LATENCY: Duration = Duration::from_millis(50);

const EVENT_CAPACITY: usize = 1024;

/// Process-wide caches shared by every node of a workspace.
///
/// Injected rather than global so tests can supply a fake status source and
/// so closing a workspace can evict exactly its own entries.
#[derive(Clone)]
pub struct CacheServices {
    pub ignores: Arc<IgnoreCache>,
    pub repos: Arc<RepoRootCache>,
    pub status: Arc<StatusCache>,
}

impl CacheServices {
    pub fn new(config: &WorkspaceConfig) -> Self {
        let source = Arc::new(GitStatusCommand::new(config.status_timeout()));
        Self::with_source(config, source)
    }

    pub fn with_source(config: &WorkspaceConfig, source: Arc<dyn StatusSource>) -> Self {
        Self {
            ignores: Arc::new(IgnoreCache::new(config.max_ancestor_depth)),
            repos: Arc::new(RepoRootCache::bounded(config.max_ancestor_depth)),
            status: Arc::new(StatusCache::new(config.status_ttl(), source)),
        }
    }

    /// Drop every cached entry keyed under `scope`.
    pub fn evict(&self, scope: &Path) {
        self.ignores.evict(scope);
        self.repos.evict(scope);
        self.status.evict(scope);
    }
}

#[derive(Debug, Clone, Copy)]
struct TreeSettings {
    debounce: Duration,
    watch_unexpanded: bool,
}

/// State shared by all nodes of one workspace.
pub struct TreeContext {
    filter: FilterEngine,
    services: CacheServices,
    debouncer: Debouncer,
    dispatcher: Dispatcher,
    watcher: Option<Arc<WatchHub>>,
    events: broadcast::Sender<TreeEvent>,
    settings: RwLock<TreeSettings>,
    next_id: AtomicU64,
}

impl TreeContext {
    /// Build the context on `runtime`. With `watch` false, or if the OS
    /// watcher cannot be started, the tree only changes on explicit refresh.
    pub fn new(
        config: &WorkspaceConfig,
        services: CacheServices,
        runtime: &Handle,
        watch: bool,
    ) -> Arc<Self> {
        let watcher = if watch {
            match WatchHub::start(WATCH_LATENCY) {
                Ok(hub) => Some(hub),
                Err(err) => {
                    warn!(%err, "file watcher unavailable, tree will not follow disk changes");
                    None
                }
            }
        } else {
            None
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            filter: FilterEngine::new(
                GlobFilter::new(config.patterns()),
                Arc::clone(&services.ignores),
            ),
            services,
            debouncer: Debouncer::new(runtime.clone()),
            dispatcher: Dispatcher::spawn(runtime),
            watcher,
            events,
            settings: RwLock::new(TreeSettings {
                debounce: config.debounce(),
                watch_unexpanded: config.watch_unexpanded,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Apply a reloaded configuration. Existing child lists keep their
    /// entries until their next reconcile.
    pub fn apply_config(&self, config: &WorkspaceConfig) {
        self.filter.set_globs(GlobFilter::new(config.patterns()));
        *self.settings.write() = TreeSettings {
            debounce: config.debounce(),
            watch_unexpanded: config.watch_unexpanded,
        };
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    pub fn services(&self) -> &CacheServices {
        &self.services
    }

    pub fn status(&self) -> &Arc<StatusCache> {
        &self.services.status
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn watcher(&self) -> Option<&Arc<WatchHub>> {
        self.watcher.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    pub fn debounce_delay(&self) -> Duration {
        self.settings.read().debounce
    }

    pub fn watch_unexpanded(&self) -> bool {
        self.settings.read().watch_unexpanded
    }

    pub(crate) fn next_id(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn notify(&self, id: NodeId, path: PathBuf, change: TreeChange) {
        // no receivers is fine
        let _ = self.events.send(TreeEvent { id, path, change });
    }
}
