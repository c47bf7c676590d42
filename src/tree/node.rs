use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::TreeContext;
use super::event::{NodeId, TreeChange};
use crate::filter::ignore_file::IGNORE_FILE;
use crate::status::StatusKind;
use crate::walker::{self, DirEntryInfo};
use crate::watcher::{ChangeSink, WatchSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A configured workspace root.
    Root,
    Directory,
    File,
}

impl NodeKind {
    pub fn can_have_children(self) -> bool {
        !matches!(self, Self::File)
    }

    pub fn can_rename(self) -> bool {
        !matches!(self, Self::Root)
    }

    pub fn can_delete(self) -> bool {
        !matches!(self, Self::Root)
    }

    pub fn can_drag(self) -> bool {
        !matches!(self, Self::Root)
    }

    /// Whether entries may be created in or moved into it.
    pub fn can_paste(self) -> bool {
        self.can_have_children()
    }

    pub fn can_preview(self) -> bool {
        matches!(self, Self::File)
    }

    /// Names of the operations a host may offer on a node of this kind.
    pub fn capabilities(self) -> Vec<&'static str> {
        [
            ("preview", self.can_preview()),
            ("rename", self.can_rename()),
            ("delete", self.can_delete()),
            ("drag", self.can_drag()),
            ("paste", self.can_paste()),
        ]
        .into_iter()
        .filter_map(|(name, allowed)| allowed.then_some(name))
        .collect()
    }
}

/// Immutable child list. Replaced as a whole, never edited in place.
pub type Children = Arc<[Arc<TreeNode>]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The child list was replaced and observers were notified.
    Updated,
    /// Nothing changed, or the directory could not be read.
    Unchanged,
    /// A reconcile of this node was already in flight.
    Busy,
    /// The node was disposed before the result could be applied.
    Discarded,
    /// Files have no children.
    NotApplicable,
}

struct Replacement {
    children: Vec<Arc<TreeNode>>,
    removed: Vec<Arc<TreeNode>>,
    added: usize,
    recut: Vec<(Arc<TreeNode>, bool)>,
}

enum Plan {
    Keep,
    Replace(Replacement),
}

struct NodeSeed {
    path: PathBuf,
    name: String,
    kind: NodeKind,
    parent: Weak<TreeNode>,
    cut: bool,
    status: StatusKind,
    has_items: bool,
}

/// One file or directory of the live tree.
///
/// Cheap to read from any thread. Mutations (child list replacement,
/// disposal, notifications) happen on the dispatcher only.
pub struct TreeNode {
    id: NodeId,
    path: PathBuf,
    name: String,
    kind: NodeKind,
    parent: Weak<TreeNode>,
    me: Weak<TreeNode>,
    ctx: Arc<TreeContext>,
    cut: AtomicBool,
    status: Mutex<StatusKind>,
    has_items: AtomicBool,
    children: RwLock<Option<Children>>,
    reconciling: AtomicBool,
    rerun: AtomicBool,
    /// Woken whenever a reconcile pass releases the gate.
    settled: Notify,
    disposed: AtomicBool,
    subscription: Mutex<Option<WatchSubscription>>,
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Clears the reconcile flag when the reconcile ends, however it ends, and
/// wakes callers waiting for the first child list.
struct ReconcileGate<'a>(&'a TreeNode);

impl Drop for ReconcileGate<'_> {
    fn drop(&mut self) {
        self.0.reconciling.store(false, Ordering::Release);
        self.0.settled.notify_waiters();
    }
}

impl TreeNode {
    /// A workspace root. Its expander is computed without filtering.
    pub(crate) fn new_root(ctx: &Arc<TreeContext>, path: PathBuf) -> Arc<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let seed = NodeSeed {
            has_items: walker::has_any_entry(&path),
            status: ctx.status().get_status(&path),
            cut: false,
            path,
            name,
            kind: NodeKind::Root,
            parent: Weak::new(),
        };
        Self::build(ctx, seed)
    }

    /// A child of `parent`. With `check_entries` false directories assume they have
    /// entries, which keeps detached search results free of extra I/O.
    fn new_child(
        ctx: &Arc<TreeContext>,
        parent: &Arc<TreeNode>,
        entry: DirEntryInfo,
        check_entries: bool,
    ) -> Arc<Self> {
        let kind = if entry.is_dir {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        let seed = NodeSeed {
            cut: ctx.filter().is_ignored(&entry.path, entry.is_dir),
            status: ctx.status().get_status(&entry.path),
            has_items: entry.is_dir && (!check_entries || walker::has_any_entry(&entry.path)),
            path: entry.path,
            name: entry.name,
            kind,
            parent: Arc::downgrade(parent),
        };
        Self::build(ctx, seed)
    }

    fn build(ctx: &Arc<TreeContext>, seed: NodeSeed) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: ctx.next_id(),
            path: seed.path,
            name: seed.name,
            kind: seed.kind,
            parent: seed.parent,
            me: Weak::clone(me),
            ctx: Arc::clone(ctx),
            cut: AtomicBool::new(seed.cut),
            status: Mutex::new(seed.status),
            has_items: AtomicBool::new(seed.has_items),
            children: RwLock::new(None),
            reconciling: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            settled: Notify::new(),
            disposed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// `None` for roots and once the parent has been dropped.
    pub fn parent(&self) -> Option<Arc<TreeNode>> {
        self.parent.upgrade()
    }

    /// Matched by the nearest `.gitignore`, or deleted but not yet reconciled away.
    pub fn is_cut(&self) -> bool {
        self.cut.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StatusKind {
        *self.status.lock()
    }

    pub fn has_items(&self) -> bool {
        self.has_items.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn is_materialized(&self) -> bool {
        self.children.read().is_some()
    }

    pub fn is_watched(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// The current child list, `None` until first materialized.
    pub fn children_snapshot(&self) -> Option<Children> {
        self.children.read().clone()
    }

    /// Full path, followed by the cut reason or the status label.
    pub fn tooltip(&self) -> String {
        let path = self.path.display();
        if self.is_cut() {
            return format!("{path}\nMatches a pattern in the {IGNORE_FILE} file");
        }
        match self.status().label() {
            Some(label) => format!("{path}\n{label}"),
            None => path.to_string(),
        }
    }

    /// The child list, materializing it on first use. A caller arriving while
    /// the first pass is in flight waits for that pass.
    pub async fn children(self: &Arc<Self>) -> Children {
        loop {
            if let Some(children) = self.children_snapshot() {
                return children;
            }
            if !self.kind.can_have_children() || self.is_disposed() {
                return Arc::from(Vec::new());
            }
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.reconcile().await != ReconcileOutcome::Busy {
                return self
                    .children_snapshot()
                    .unwrap_or_else(|| Arc::from(Vec::new()));
            }
            settled.await;
        }
    }

    /// Materialize every directory down to `depth` levels below this node.
    pub async fn expand(self: &Arc<Self>, depth: usize) {
        let mut level = vec![Arc::clone(self)];
        for _ in 0..depth {
            let mut next = Vec::new();
            for node in &level {
                let children = node.children().await;
                next.extend(
                    children
                        .iter()
                        .filter(|child| child.kind.can_have_children())
                        .map(Arc::clone),
                );
            }
            if next.is_empty() {
                break;
            }
            level = next;
        }
    }

    /// Walk down from this node to `target`, materializing directories on the way.
    pub async fn locate(self: &Arc<Self>, target: &Path) -> Option<Arc<TreeNode>> {
        let rest = target.strip_prefix(&self.path).ok()?;
        let mut current = Arc::clone(self);
        for component in rest.components() {
            let children = current.children().await;
            let next = children
                .iter()
                .find(|child| component.as_os_str() == child.name.as_str())
                .map(Arc::clone)?;
            current = next;
        }
        Some(current)
    }

    /// Bring the child list in line with the directory on disk.
    ///
    /// Enumeration runs off the dispatcher; only the final swap, disposal of
    /// removed children and notifications run on it. A call made while a
    /// reconcile of the same node is running returns `Busy` and makes the
    /// running one enumerate again once it finishes. An enumeration error or
    /// a missing directory leaves the children untouched, and an identical
    /// result emits nothing.
    pub async fn reconcile(self: &Arc<Self>) -> ReconcileOutcome {
        if !self.kind.can_have_children() {
            return ReconcileOutcome::NotApplicable;
        }
        if self.is_disposed() {
            return ReconcileOutcome::Discarded;
        }
        if self.reconciling.swap(true, Ordering::AcqRel) {
            trace!(path = %self.path.display(), "reconcile already running");
            self.rerun.store(true, Ordering::Release);
            return ReconcileOutcome::Busy;
        }

        let mut outcome = ReconcileOutcome::Unchanged;
        loop {
            let gate = ReconcileGate(self);
            loop {
                self.rerun.store(false, Ordering::Release);
                match self.reconcile_once().await {
                    ReconcileOutcome::Updated => outcome = ReconcileOutcome::Updated,
                    ReconcileOutcome::Discarded => return ReconcileOutcome::Discarded,
                    _ => {}
                }
                if !self.rerun.swap(false, Ordering::AcqRel) {
                    break;
                }
                trace!(path = %self.path.display(), "changed during reconcile, running again");
            }
            drop(gate);
            // a request may land between the last check and the release
            if !self.rerun.load(Ordering::Acquire) || self.reconciling.swap(true, Ordering::AcqRel) {
                return outcome;
            }
        }
    }

    async fn reconcile_once(self: &Arc<Self>) -> ReconcileOutcome {
        let node = Arc::clone(self);
        let plan = match tokio::task::spawn_blocking(move || node.plan_children()).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "enumeration task failed");
                Plan::Keep
            }
        };

        let replacement = match plan {
            Plan::Keep => return ReconcileOutcome::Unchanged,
            Plan::Replace(replacement) => replacement,
        };

        let node = Arc::clone(self);
        self.ctx
            .dispatcher()
            .run(move || node.apply(replacement))
            .await
            .unwrap_or(ReconcileOutcome::Discarded)
    }

    /// Schedule a debounced reconcile. Only expanded directories that still
    /// exist are refreshed; nothing cascades to descendants.
    pub fn request_refresh(self: &Arc<Self>) {
        if !self.kind.can_have_children()
            || self.is_disposed()
            || !self.is_materialized()
            || !self.path.is_dir()
        {
            return;
        }
        let node = Arc::clone(self);
        self.ctx.debouncer().debounce(
            self.debounce_key(),
            self.ctx.debounce_delay(),
            async move {
                node.reconcile().await;
            },
        );
    }

    /// Query the status cache (rescanning if stale) and publish a change.
    pub async fn refresh_status(self: &Arc<Self>) -> StatusKind {
        let status = self.ctx.status().get_status_async(&self.path).await;
        let node = Arc::clone(self);
        let _ = self
            .ctx
            .dispatcher()
            .run(move || node.set_status(status))
            .await;
        status
    }

    /// Mark (or unmark) the node as cut and notify.
    pub fn set_cut(self: &Arc<Self>, cut: bool) {
        let node = Arc::clone(self);
        self.ctx.dispatcher().post(move || node.apply_cut(cut));
    }

    /// Children for a read-only traversal: the live list when materialized,
    /// otherwise detached nodes from a fresh enumeration. Never mutates the tree.
    pub(crate) fn children_for_search(self: &Arc<Self>) -> Vec<Arc<TreeNode>> {
        if let Some(children) = self.children_snapshot() {
            return children.to_vec();
        }
        if !self.kind.can_have_children() || self.is_disposed() {
            return Vec::new();
        }
        let Ok(mut entries) = walker::read_entries(&self.path, self.ctx.filter()) else {
            return Vec::new();
        };
        walker::sort_entries(&mut entries, |e| (e.is_dir, e.name.as_str()));
        entries
            .into_iter()
            .map(|entry| TreeNode::new_child(&self.ctx, self, entry, false))
            .collect()
    }

    /// Start watching this directory if it is not already. Dispatcher only.
    pub(crate) fn watch(&self) {
        if !self.kind.can_have_children() || self.is_disposed() {
            return;
        }
        let Some(hub) = self.ctx.watcher() else {
            return;
        };
        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            let sink: Weak<dyn ChangeSink> = self.me.clone();
            *subscription = hub.subscribe(&self.path, sink);
        }
    }

    /// Release the subscription, then dispose every materialized descendant.
    /// Idempotent. Dispatcher only.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscription.lock().take();
        self.ctx.debouncer().cancel(&self.debounce_key());

        let children = self.children.write().take();
        for child in children.iter().flat_map(|c| c.iter()) {
            child.dispose();
        }
        self.notify(TreeChange::Disposed);
    }

    fn plan_children(self: &Arc<Self>) -> Plan {
        if !self.path.is_dir() {
            // transiently missing or deleted; the parent's reconcile removes it
            trace!(path = %self.path.display(), "directory missing, keeping children");
            return Plan::Keep;
        }
        let mut entries = match walker::read_entries(&self.path, self.ctx.filter()) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %self.path.display(), %err, "enumeration failed, keeping children");
                return Plan::Keep;
            }
        };
        walker::sort_entries(&mut entries, |e| (e.is_dir, e.name.as_str()));

        let current = self.children_snapshot();
        let existing: HashMap<&Path, &Arc<TreeNode>> = current
            .iter()
            .flat_map(|c| c.iter())
            .map(|child| (child.path(), child))
            .collect();

        let mut children = Vec::with_capacity(entries.len());
        let mut recut = Vec::new();
        let mut added = 0;
        for entry in entries {
            match existing.get(entry.path.as_path()) {
                // a file replaced by a directory of the same name gets a new node
                Some(child) if (child.kind == NodeKind::Directory) == entry.is_dir => {
                    let cut = self.ctx.filter().is_ignored(&entry.path, entry.is_dir);
                    if cut != child.is_cut() {
                        recut.push((Arc::clone(child), cut));
                    }
                    children.push(Arc::clone(child));
                }
                _ => {
                    children.push(TreeNode::new_child(&self.ctx, self, entry, true));
                    added += 1;
                }
            }
        }

        let kept: HashSet<NodeId> = children.iter().map(|c| c.id).collect();
        let removed: Vec<Arc<TreeNode>> = current
            .iter()
            .flat_map(|c| c.iter())
            .filter(|child| !kept.contains(&child.id))
            .map(Arc::clone)
            .collect();

        if current.is_some() && added == 0 && removed.is_empty() && recut.is_empty() {
            return Plan::Keep;
        }
        Plan::Replace(Replacement {
            children,
            removed,
            added,
            recut,
        })
    }

    fn apply(self: &Arc<Self>, replacement: Replacement) -> ReconcileOutcome {
        if self.is_disposed() {
            return ReconcileOutcome::Discarded;
        }
        let Replacement {
            children,
            removed,
            added,
            recut,
        } = replacement;

        for child in &removed {
            child.dispose();
        }
        for (child, cut) in recut {
            child.apply_cut(cut);
        }

        let unchanged_list = added == 0 && removed.is_empty() && self.is_materialized();
        if unchanged_list {
            return ReconcileOutcome::Updated;
        }

        if self.ctx.watch_unexpanded() {
            for child in &children {
                child.watch();
            }
        }

        let total = children.len();
        *self.children.write() = Some(Arc::from(children));
        self.watch();
        self.has_items.store(total > 0, Ordering::Release);

        trace!(path = %self.path.display(), added, removed = removed.len(), total, "children replaced");
        self.notify(TreeChange::HasItems {
            has_items: total > 0,
        });
        self.notify(TreeChange::Items {
            added,
            removed: removed.len(),
            total,
        });
        ReconcileOutcome::Updated
    }

    fn apply_cut(&self, cut: bool) {
        if self.is_disposed() {
            return;
        }
        if self.cut.swap(cut, Ordering::AcqRel) != cut {
            self.notify(TreeChange::Cut { cut });
        }
    }

    fn set_status(&self, status: StatusKind) {
        if self.is_disposed() {
            return;
        }
        let changed = {
            let mut current = self.status.lock();
            std::mem::replace(&mut *current, status) != status
        };
        if changed {
            self.notify(TreeChange::Status { status });
        }
    }

    fn set_has_items(&self, has_items: bool) {
        if self.is_disposed() {
            return;
        }
        if self.has_items.swap(has_items, Ordering::AcqRel) != has_items {
            self.notify(TreeChange::HasItems { has_items });
        }
    }

    /// Debounced recheck of the expander of a watched, unexpanded directory.
    fn request_expander_check(self: &Arc<Self>) {
        let node = Arc::clone(self);
        self.ctx.debouncer().debounce(
            self.debounce_key(),
            self.ctx.debounce_delay(),
            async move {
                let target = Arc::clone(&node);
                let Ok(has_items) =
                    tokio::task::spawn_blocking(move || walker::has_any_entry(&target.path)).await
                else {
                    return;
                };
                let dispatcher = node.ctx.dispatcher().clone();
                dispatcher.post(move || node.set_has_items(has_items));
            },
        );
    }

    fn debounce_key(&self) -> String {
        format!("{}:{}", self.id.0, self.path.display())
    }

    fn notify(&self, change: TreeChange) {
        self.ctx.notify(self.id, self.path.clone(), change);
    }
}

impl ChangeSink for TreeNode {
    fn on_change(&self, path: &Path) {
        if self.is_disposed() {
            return;
        }
        if path.file_name().is_some_and(|name| name == IGNORE_FILE) {
            self.ctx.filter().ignores().evict(&self.path);
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        if me.is_materialized() {
            me.request_refresh();
        } else {
            me.request_expander_check();
        }
    }
}
