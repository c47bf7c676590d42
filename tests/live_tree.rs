/// Library-level scenarios for a live workspace: disk changes flowing into the
/// tree through the watcher, configured filters, status refresh and root
/// lifecycle.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use workspace_files::status::StatusSource;
use workspace_files::tree::{CacheServices, TreeChange, TreeNode};
use workspace_files::workspace::MemoryVariableStore;
use workspace_files::{StatusKind, Workspace, WorkspaceConfig, WorkspaceOptions};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct FixedStatus {
    porcelain: String,
    calls: AtomicUsize,
}

impl StatusSource for FixedStatus {
    fn list(&self, _repo_root: &Path) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.porcelain.clone())
    }
}

fn quick_config() -> WorkspaceConfig {
    WorkspaceConfig {
        debounce_ms: 20,
        ..WorkspaceConfig::default()
    }
}

async fn open(dir: &Path, config: WorkspaceConfig, watch: bool) -> Workspace {
    let options = WorkspaceOptions {
        services: CacheServices::new(&config),
        config,
        store: Arc::new(MemoryVariableStore::default()),
        watch,
    };
    Workspace::open_with(dir, options).await
}

/// `dir` with an empty `.git` so it is its own default root.
fn repo() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");
    fs::create_dir_all(dir.join(".git")).unwrap();
    (tmp, dir)
}

fn names(node: &TreeNode) -> Vec<String> {
    node.children_snapshot()
        .map(|c| c.iter().map(|n| n.name().to_owned()).collect())
        .unwrap_or_default()
}

/// Poll until `check` holds, for at most five seconds.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Live updates
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tree_follows_disk_changes() {
    let (_tmp, dir) = repo();
    fs::create_dir(dir.join("src")).unwrap();
    fs::write(dir.join("src/lib.rs"), "").unwrap();

    let ws = open(&dir, quick_config(), true).await;
    ws.expand(2).await;
    let root = Arc::clone(&ws.root_nodes()[0]);
    let src = Arc::clone(&root.children().await[0]);
    assert!(src.is_watched());
    assert_eq!(names(&src), vec!["lib.rs"]);

    fs::write(dir.join("src/main.rs"), "").unwrap();
    assert!(
        eventually(|| names(&src) == ["lib.rs", "main.rs"]).await,
        "created file never appeared: {:?}",
        names(&src)
    );

    fs::remove_file(dir.join("src/lib.rs")).unwrap();
    assert!(
        eventually(|| names(&src) == ["main.rs"]).await,
        "deleted file never disappeared: {:?}",
        names(&src)
    );

    ws.close().await;
}

/// A burst of changes in one directory settles into one consistent list.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_changes_converges() {
    let (_tmp, dir) = repo();
    let ws = open(&dir, quick_config(), true).await;
    let root = Arc::clone(&ws.root_nodes()[0]);
    root.children().await;
    let mut events = ws.subscribe();

    for i in 0..25 {
        fs::write(dir.join(format!("f{i:02}.txt")), "").unwrap();
    }
    assert!(
        eventually(|| names(&root).len() == 25).await,
        "expected 25 children, got {}",
        names(&root).len()
    );
    let listed = names(&root);
    let mut sorted = listed.clone();
    sorted.sort();
    assert_eq!(listed, sorted);

    let mut replacements = 0;
    while let Ok(event) = events.try_recv() {
        if event.id == root.id() && matches!(event.change, TreeChange::Items { .. }) {
            replacements += 1;
        }
    }
    assert!(
        (1..25).contains(&replacements),
        "changes were not coalesced: {replacements} replacements"
    );

    ws.close().await;
}

/// Entries matching a configured pattern never enter the tree, whether the
/// change arrives through enumeration or through the watcher.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configured_patterns_hold_for_watched_changes() {
    let (_tmp, dir) = repo();
    fs::write(dir.join("keep.txt"), "").unwrap();
    fs::write(dir.join("drop.bak"), "").unwrap();
    let config = WorkspaceConfig {
        ignore_patterns: "*.bak".into(),
        ..quick_config()
    };

    let ws = open(&dir, config, true).await;
    let root = Arc::clone(&ws.root_nodes()[0]);
    root.children().await;
    assert_eq!(names(&root), vec!["keep.txt"]);

    fs::write(dir.join("other.bak"), "").unwrap();
    fs::write(dir.join("visible.txt"), "").unwrap();
    assert!(eventually(|| names(&root).len() == 2).await);
    assert_eq!(names(&root), vec!["keep.txt", "visible.txt"]);

    let hits = ws.search("bak", 10).await;
    assert!(hits.is_empty(), "hidden entries were searchable");

    ws.close().await;
}

/// Directories above the workspace never take part in pattern matching, and
/// the workspace state directory stays out of the tree.
#[tokio::test]
async fn test_patterns_match_below_the_root_only() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("mybuilds/repo");
    fs::create_dir_all(dir.join(".git")).unwrap();
    fs::create_dir_all(dir.join(".workspace-files")).unwrap();
    fs::write(dir.join(".workspace-files/state.toml"), "version = 1\n").unwrap();
    fs::write(dir.join("main.rs"), "").unwrap();
    fs::write(dir.join("build.log"), "").unwrap();
    let config = WorkspaceConfig {
        ignore_patterns: "*build*".into(),
        ..WorkspaceConfig::default()
    };

    let ws = open(&dir, config, false).await;
    let root = Arc::clone(&ws.root_nodes()[0]);
    root.children().await;
    assert_eq!(names(&root), vec!["main.rs"]);
    assert!(ws.search("state", 10).await.is_empty());
}

/// Editing `.gitignore` re-cuts the existing children in place.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gitignore_edit_recuts_children() {
    let (_tmp, dir) = repo();
    fs::write(dir.join("app.log"), "").unwrap();
    fs::write(dir.join("main.rs"), "").unwrap();

    let ws = open(&dir, quick_config(), true).await;
    let root = Arc::clone(&ws.root_nodes()[0]);
    let children = root.children().await;
    let log = children.iter().find(|c| c.name() == "app.log").unwrap().clone();
    assert!(!log.is_cut());

    fs::write(dir.join(".gitignore"), "*.log\n").unwrap();
    assert!(
        eventually(|| log.is_cut()).await,
        "app.log was not cut after the ignore file changed"
    );
    let kept = root.children_snapshot().unwrap();
    assert!(kept.iter().any(|c| Arc::ptr_eq(c, &log)), "node was replaced");

    ws.close().await;
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_refresh_notifies_changed_nodes() {
    let (_tmp, dir) = repo();
    fs::write(dir.join("changed.rs"), "").unwrap();
    fs::write(dir.join("clean.rs"), "").unwrap();

    let source = Arc::new(FixedStatus {
        porcelain: " M changed.rs\n".into(),
        calls: AtomicUsize::new(0),
    });
    let config = WorkspaceConfig::default();
    let options = WorkspaceOptions {
        services: CacheServices::with_source(&config, source.clone()),
        config,
        store: Arc::new(MemoryVariableStore::default()),
        watch: false,
    };
    let ws = Workspace::open_with(&dir, options).await;
    let root = Arc::clone(&ws.root_nodes()[0]);
    let children = root.children().await;
    let mut events = ws.subscribe();

    let changed = children.iter().find(|c| c.name() == "changed.rs").unwrap();
    let clean = children.iter().find(|c| c.name() == "clean.rs").unwrap();
    assert_eq!(changed.refresh_status().await, StatusKind::Modified);
    assert_eq!(clean.refresh_status().await, StatusKind::Unmodified);
    assert_eq!(changed.status(), StatusKind::Modified);
    assert!(changed.tooltip().ends_with("Pending - Edit"));

    let event = events.try_recv().unwrap();
    assert_eq!(event.id, changed.id());
    assert_eq!(
        event.change,
        TreeChange::Status {
            status: StatusKind::Modified
        }
    );
    // one scan serves both lookups within the TTL
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Root lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_root_stops_watching() {
    let (tmp, dir) = repo();
    let extra = tmp.path().join("extra");
    fs::create_dir_all(extra.join("nested")).unwrap();

    let ws = open(&dir, quick_config(), true).await;
    ws.add_root(&extra).await.unwrap();
    ws.expand(1).await;
    let hub = Arc::clone(ws.context().watcher().expect("watcher running"));
    let extra_node = Arc::clone(&ws.root_nodes()[1]);
    let nested = Arc::clone(&extra_node.children().await[0]);
    assert!(hub.is_watched(extra_node.path()));

    ws.remove_root(&extra).await.unwrap();
    assert!(extra_node.is_disposed());
    assert!(nested.is_disposed());
    assert!(!hub.is_watched(extra_node.path()));
    assert_eq!(ws.root_nodes().len(), 1);

    ws.close().await;
    assert_eq!(hub.watched_count(), 0);
}

#[tokio::test]
async fn test_search_reaches_unexpanded_directories() {
    let (_tmp, dir) = repo();
    fs::create_dir_all(dir.join("a/b/c")).unwrap();
    fs::write(dir.join("a/b/c/target.txt"), "").unwrap();
    fs::write(dir.join("target.md"), "").unwrap();

    let ws = open(&dir, WorkspaceConfig::default(), false).await;
    let hits = ws.search("TARGET", 10).await;
    let found: Vec<_> = hits.iter().map(|h| h.relative_path()).collect();
    assert_eq!(
        found,
        vec![PathBuf::from("target.md"), PathBuf::from("a/b/c/target.txt")]
    );
    assert_eq!(hits[1].depth(), 4);
    // the search never materializes the live tree
    assert!(!ws.root_nodes()[0].is_materialized());
}
