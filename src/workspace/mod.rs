//! The root aggregator: one virtual collection composed of a node per
//! configured root directory.

pub mod roots;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use roots::{ROOTS_VARIABLE, RootSet};
pub use store::{FileVariableStore, MemoryVariableStore, VariableStore};

use crate::config::WorkspaceConfig;
use crate::search::{self, SearchHit};
use crate::tree::{CacheServices, Children, NodeId, TreeChange, TreeContext, TreeEvent, TreeNode};

/// How a workspace is opened.
pub struct WorkspaceOptions {
    pub config: WorkspaceConfig,
    pub services: CacheServices,
    pub store: Arc<dyn VariableStore>,
    /// Follow disk changes with an OS watcher.
    pub watch: bool,
}

impl WorkspaceOptions {
    /// Configuration and state read from `dir`, git-backed status, watching on.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let config = WorkspaceConfig::load(dir);
        let services = CacheServices::new(&config);
        let store = FileVariableStore::load(dir)
            .with_context(|| format!("failed to load workspace state in {}", dir.display()))?;
        Ok(Self {
            config,
            services,
            store: Arc::new(store),
            watch: true,
        })
    }
}

pub struct Workspace {
    dir: PathBuf,
    ctx: Arc<TreeContext>,
    store: Arc<dyn VariableStore>,
    config: RwLock<WorkspaceConfig>,
    roots: RwLock<RootSet>,
    nodes: Arc<RwLock<Children>>,
    closed: AtomicBool,
}

impl Workspace {
    /// Open the workspace in `dir` with its own configuration and state.
    pub async fn open(dir: &Path) -> anyhow::Result<Self> {
        let options = WorkspaceOptions::load(dir)?;
        Ok(Self::open_with(dir, options).await)
    }

    pub async fn open_with(dir: &Path, options: WorkspaceOptions) -> Self {
        let dir = roots::normalize(dir);
        let ctx = TreeContext::new(
            &options.config,
            options.services,
            &Handle::current(),
            options.watch,
        );
        let roots = RootSet::restore(
            &dir,
            options.store.get(ROOTS_VARIABLE).as_deref(),
            &ctx.services().repos,
        );
        debug!(workspace = %dir.display(), roots = roots.len(), "workspace opened");

        let workspace = Self {
            dir,
            ctx,
            store: options.store,
            config: RwLock::new(options.config),
            roots: RwLock::new(roots),
            nodes: Arc::new(RwLock::new(Arc::from(Vec::new()))),
            closed: AtomicBool::new(false),
        };
        workspace.rebuild().await;
        workspace
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context(&self) -> &Arc<TreeContext> {
        &self.ctx
    }

    pub fn config(&self) -> WorkspaceConfig {
        self.config.read().clone()
    }

    /// The configured root directories, in order.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.read().iter().map(Path::to_path_buf).collect()
    }

    /// The root collection: one node per configured root, empty when disabled.
    pub fn root_nodes(&self) -> Children {
        Arc::clone(&self.nodes.read())
    }

    pub fn has_items(&self) -> bool {
        !self.nodes.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.ctx.subscribe()
    }

    /// Add a root directory. Returns false if it was already configured.
    pub async fn add_root(&self, dir: &Path) -> anyhow::Result<bool> {
        anyhow::ensure!(dir.is_dir(), "'{}' is not a directory", dir.display());
        if !self.roots.write().insert(dir) {
            return Ok(false);
        }
        self.persist_roots()?;
        self.rebuild().await;
        Ok(true)
    }

    /// Remove a root directory. Its node and descendants are disposed.
    pub async fn remove_root(&self, dir: &Path) -> anyhow::Result<bool> {
        if !self.roots.write().remove(dir) {
            return Ok(false);
        }
        self.persist_roots()?;
        self.rebuild().await;
        Ok(true)
    }

    /// Apply a new configuration: rebuild the shared matcher once, drop every
    /// status snapshot, then rebuild the root collection.
    pub async fn reload_config(&self, config: WorkspaceConfig) {
        self.ctx.apply_config(&config);
        self.ctx.status().invalidate();
        *self.config.write() = config;
        self.rebuild().await;
    }

    /// Schedule a debounced reconcile of every expanded root and make the
    /// next status query rescan. Does not cascade.
    pub fn refresh(&self) {
        self.ctx.status().mark_stale();
        for node in self.root_nodes().iter() {
            node.request_refresh();
        }
    }

    /// Materialize every directory down to `depth` levels below the roots.
    pub async fn expand(&self, depth: usize) {
        for root in self.root_nodes().iter() {
            root.expand(depth).await;
        }
    }

    /// The node for `path`, materializing its ancestors on the way.
    pub async fn locate(&self, path: &Path) -> Option<Arc<TreeNode>> {
        let path = roots::normalize(path);
        let root = self
            .root_nodes()
            .iter()
            .filter(|root| path.starts_with(root.path()))
            .max_by_key(|root| root.path().components().count())
            .map(Arc::clone)?;
        root.locate(&path).await
    }

    /// Breadth-first search over every root, capped at `limit` hits.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        search::collect(self.root_nodes().to_vec(), query, limit).await
    }

    /// Dispose every root and evict all cache entries under the workspace.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let nodes = Arc::clone(&self.nodes);
        let _ = self
            .ctx
            .dispatcher()
            .run(move || {
                let old = std::mem::replace(&mut *nodes.write(), Arc::from(Vec::new()));
                for node in old.iter() {
                    node.dispose();
                }
            })
            .await;

        let services = self.ctx.services();
        services.evict(&self.dir);
        for root in self.roots.read().iter() {
            services.evict(root);
        }
        debug!(workspace = %self.dir.display(), "workspace closed");
    }

    fn persist_roots(&self) -> anyhow::Result<()> {
        let roots = self.roots.read();
        let value = roots.to_persisted(&self.dir);
        // an empty set is not persisted, so the next open falls back to the default root
        self.store
            .set(ROOTS_VARIABLE, &value, !roots.is_empty())
            .context("failed to persist workspace roots")
    }

    /// Recompose the root collection. Roots still configured keep their node;
    /// dropped ones are disposed.
    async fn rebuild(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let wanted: Vec<PathBuf> = if self.config.read().enabled {
            self.roots()
        } else {
            Vec::new()
        };
        let current = self.root_nodes();

        let ctx = Arc::clone(&self.ctx);
        let fresh = tokio::task::spawn_blocking(move || {
            wanted
                .into_iter()
                .map(|dir| {
                    current
                        .iter()
                        .find(|node| node.path() == dir && !node.is_disposed())
                        .map(Arc::clone)
                        .unwrap_or_else(|| TreeNode::new_root(&ctx, dir))
                })
                .collect::<Vec<_>>()
        })
        .await;
        let fresh = match fresh {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(%err, "failed to build root collection");
                return;
            }
        };

        let nodes = Arc::clone(&self.nodes);
        let ctx = Arc::clone(&self.ctx);
        let dir = self.dir.clone();
        let _ = self
            .ctx
            .dispatcher()
            .run(move || {
                let old = std::mem::replace(&mut *nodes.write(), Arc::from(fresh));
                let current = Arc::clone(&nodes.read());
                for node in old.iter() {
                    if !current.iter().any(|n| Arc::ptr_eq(n, node)) {
                        node.dispose();
                    }
                }
                if ctx.watch_unexpanded() {
                    for node in current.iter() {
                        node.watch();
                    }
                }
                ctx.notify(
                    NodeId::WORKSPACE,
                    dir,
                    TreeChange::Roots {
                        total: current.len(),
                    },
                );
            })
            .await;
    }
}
