//! Time-to-live cache of git status, one snapshot per repository.
//!
//! A snapshot is replaced as a whole after every successful rescan, so entries
//! for files that became clean disappear together with the rescan and readers
//! never see a half-populated repository. Unrelated repositories are untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::command::StatusSource;
use super::parse::parse_porcelain;
use super::StatusKind;
use crate::filter::RepoRootCache;

/// Parsed listing of one repository.
struct Listing {
    entries: HashMap<PathBuf, StatusKind>,
    /// Most significant status below each directory that has listed entries.
    summaries: HashMap<PathBuf, StatusKind>,
}

impl Listing {
    fn new(repo: &Path, entries: HashMap<PathBuf, StatusKind>) -> Self {
        let mut summaries: HashMap<PathBuf, StatusKind> = HashMap::new();
        for (path, kind) in &entries {
            for dir in path.ancestors().skip(1) {
                if !dir.starts_with(repo) {
                    break;
                }
                let slot = summaries.entry(dir.to_path_buf()).or_insert(*kind);
                if kind.significance() > slot.significance() {
                    *slot = *kind;
                }
            }
        }
        Self { entries, summaries }
    }

    /// Listed status, then the status of a listed ancestor, then the summary
    /// of the entries below, then unmodified.
    fn lookup(&self, repo: &Path, path: &Path) -> StatusKind {
        if let Some(kind) = self.entries.get(path) {
            return *kind;
        }
        self.ancestor_status(repo, path)
            .or_else(|| self.summaries.get(path).copied())
            .unwrap_or(StatusKind::Unmodified)
    }

    fn ancestor_status(&self, repo: &Path, path: &Path) -> Option<StatusKind> {
        path.ancestors()
            .skip(1)
            .take_while(|dir| dir.starts_with(repo) && *dir != repo)
            .find_map(|dir| self.entries.get(dir).copied())
    }
}

struct RepoSnapshot {
    /// `None` once marked stale.
    refreshed: Option<Instant>,
    listing: Arc<Listing>,
}

pub struct StatusCache {
    ttl: Duration,
    source: Arc<dyn StatusSource>,
    repos: RepoRootCache,
    snapshots: DashMap<PathBuf, RepoSnapshot>,
    refresh_gate: Mutex<()>,
}

impl StatusCache {
    pub fn new(ttl: Duration, source: Arc<dyn StatusSource>) -> Self {
        Self {
            ttl,
            source,
            repos: RepoRootCache::unbounded(),
            snapshots: DashMap::new(),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached status of `path` without touching the filesystem.
    ///
    /// Paths in a repository that has been scanned resolve to their listed
    /// status, the status of a listed ancestor directory, the most significant
    /// status below them (directories), or unmodified. Anything else is
    /// not-in-repo.
    pub fn get_status(&self, path: &Path) -> StatusKind {
        let Some(path) = normalize(path) else {
            return StatusKind::NotInRepo;
        };
        match self.snapshot_for(&path) {
            Some((repo, listing)) => listing.lookup(&repo, &path),
            None => StatusKind::NotInRepo,
        }
    }

    /// Status of `path`, rescanning its repository first if the cache is stale.
    pub async fn get_status_async(self: &Arc<Self>, path: &Path) -> StatusKind {
        if path.as_os_str().is_empty() || !path.exists() {
            return StatusKind::NotInRepo;
        }
        let Some(path) = normalize(path) else {
            return StatusKind::NotInRepo;
        };

        if let Some((repo, listing)) = self.fresh_snapshot_for(&path) {
            return listing.lookup(&repo, &path);
        }

        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.status_blocking(&path))
            .await
            .unwrap_or(StatusKind::NotInRepo)
    }

    /// Blocking body of [`get_status_async`](Self::get_status_async).
    pub fn status_blocking(&self, path: &Path) -> StatusKind {
        let start = if path.is_dir() {
            path
        } else {
            match path.parent() {
                Some(parent) => parent,
                None => return StatusKind::NotInRepo,
            }
        };
        let Some(repo) = self.repos.find(start) else {
            return StatusKind::NotInRepo;
        };

        if self.is_stale(&repo) {
            self.refresh_single_flight(&repo);
        }

        match self.snapshots.get(&repo) {
            Some(snapshot) => snapshot.listing.lookup(&repo, path),
            None => StatusKind::NotInRepo,
        }
    }

    /// Status derived from the nearest listed ancestor directory of `path`.
    ///
    /// Git reports untracked directories as a single `?? dir/` line, so files
    /// below them are only reachable through this lookup.
    pub fn parent_status(&self, path: &Path) -> StatusKind {
        let Some(path) = normalize(path) else {
            return StatusKind::NotInRepo;
        };
        self.snapshot_for(&path)
            .and_then(|(repo, listing)| listing.ancestor_status(&repo, &path))
            .unwrap_or(StatusKind::NotInRepo)
    }

    /// Most significant status among the listed entries below `dir`.
    pub fn directory_summary(&self, dir: &Path) -> Option<StatusKind> {
        let dir = normalize(dir)?;
        let (_, listing) = self.snapshot_for(&dir)?;
        listing.summaries.get(&dir).copied()
    }

    /// Rescan `repo` now. Returns false when the status command was unavailable,
    /// in which case the previous snapshot is kept.
    pub fn rescan(&self, repo: &Path) -> bool {
        let Some(output) = self.source.list(repo) else {
            debug!(repo = %repo.display(), "status unavailable, keeping previous snapshot");
            if let Some(mut snapshot) = self.snapshots.get_mut(repo) {
                // back off until the next TTL window
                snapshot.refreshed = Some(Instant::now());
            }
            return false;
        };

        let entries: HashMap<PathBuf, StatusKind> = parse_porcelain(&output)
            .into_iter()
            .map(|line| (repo.join(&line.path), line.kind()))
            .collect();
        trace!(repo = %repo.display(), entries = entries.len(), "status rescanned");

        self.snapshots.insert(
            repo.to_path_buf(),
            RepoSnapshot {
                refreshed: Some(Instant::now()),
                listing: Arc::new(Listing::new(repo, entries)),
            },
        );
        true
    }

    /// Force the next async query of every repository to rescan.
    pub fn mark_stale(&self) {
        for mut snapshot in self.snapshots.iter_mut() {
            snapshot.refreshed = None;
        }
    }

    /// Drop every snapshot.
    pub fn invalidate(&self) {
        self.snapshots.clear();
    }

    /// Forget everything keyed under `scope`.
    ///
    /// Repositories inside the scope are dropped entirely; a repository that
    /// encloses the scope loses only the entries below it and is marked stale.
    pub fn evict(&self, scope: &Path) {
        self.repos.evict(scope);
        self.snapshots.retain(|repo, _| !repo.starts_with(scope));
        for mut snapshot in self.snapshots.iter_mut() {
            if scope.starts_with(snapshot.key()) {
                let kept: HashMap<PathBuf, StatusKind> = snapshot
                    .listing
                    .entries
                    .iter()
                    .filter(|(path, _)| !path.starts_with(scope))
                    .map(|(path, kind)| (path.clone(), *kind))
                    .collect();
                let repo = snapshot.key().clone();
                snapshot.listing = Arc::new(Listing::new(&repo, kept));
                snapshot.refreshed = None;
            }
        }
    }

    pub fn repository_count(&self) -> usize {
        self.snapshots.len()
    }

    fn is_stale(&self, repo: &Path) -> bool {
        self.snapshots
            .get(repo)
            .is_none_or(|s| s.refreshed.is_none_or(|at| at.elapsed() >= self.ttl))
    }

    /// Only one caller rescans; while a snapshot exists the others keep
    /// reading it instead of waiting.
    fn refresh_single_flight(&self, repo: &Path) {
        let _guard = if self.snapshots.contains_key(repo) {
            match self.refresh_gate.try_lock() {
                Some(guard) => guard,
                None => return,
            }
        } else {
            self.refresh_gate.lock()
        };

        if self.is_stale(repo) {
            self.rescan(repo);
        }
    }

    /// Innermost scanned repository containing `path`.
    fn snapshot_for(&self, path: &Path) -> Option<(PathBuf, Arc<Listing>)> {
        self.snapshots
            .iter()
            .filter(|s| path.starts_with(s.key()))
            .max_by_key(|s| s.key().components().count())
            .map(|s| (s.key().clone(), Arc::clone(&s.listing)))
    }

    fn fresh_snapshot_for(&self, path: &Path) -> Option<(PathBuf, Arc<Listing>)> {
        let (repo, entries) = self.snapshot_for(path)?;
        (!self.is_stale(&repo)).then_some((repo, entries))
    }
}

fn normalize(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    std::path::absolute(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves whatever listing the test last set.
    #[derive(Default)]
    struct FakeSource {
        listing: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn set(&self, listing: Option<&str>) {
            *self.listing.lock() = listing.map(str::to_owned);
        }
    }

    impl StatusSource for FakeSource {
        fn list(&self, _repo_root: &Path) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.listing.lock().clone()
        }
    }

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.txt"), "a").unwrap();
        fs::write(dir.path().join("src/b.txt"), "b").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_ttl_expiry_picks_up_reverted_file() {
        let dir = repo();
        let source = Arc::new(FakeSource::default());
        source.set(Some(" M src/a.txt\n"));
        let cache = Arc::new(StatusCache::new(Duration::from_millis(200), source.clone()));
        let file = dir.path().join("src/a.txt");

        assert_eq!(cache.get_status_async(&file).await, StatusKind::Modified);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // file reverted externally, but the cache is still fresh
        source.set(Some(""));
        assert_eq!(cache.get_status_async(&file).await, StatusKind::Modified);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.get_status_async(&file).await, StatusKind::Unmodified);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sync_lookup_is_cache_only() {
        let dir = repo();
        let source = Arc::new(FakeSource::default());
        source.set(Some("?? src/\n"));
        let cache = Arc::new(StatusCache::new(Duration::from_secs(60), source.clone()));
        let file = dir.path().join("src/b.txt");

        assert_eq!(cache.get_status(&file), StatusKind::NotInRepo);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        assert_eq!(cache.get_status_async(&file).await, StatusKind::Untracked);
        assert_eq!(cache.get_status(&file), StatusKind::Untracked);
        assert_eq!(cache.parent_status(&file), StatusKind::Untracked);
        assert_eq!(cache.get_status(&dir.path().join("README.md")), StatusKind::Unmodified);
    }

    #[tokio::test]
    async fn test_failed_command_keeps_previous_snapshot() {
        let dir = repo();
        let source = Arc::new(FakeSource::default());
        source.set(Some("A  src/b.txt\n"));
        let cache = Arc::new(StatusCache::new(Duration::from_millis(50), source.clone()));
        let file = dir.path().join("src/b.txt");

        assert_eq!(cache.get_status_async(&file).await, StatusKind::Added);

        source.set(None);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get_status_async(&file).await, StatusKind::Added);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_outside_repository_is_not_in_repo() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("loose.txt");
        fs::write(&file, "").unwrap();
        let source = Arc::new(FakeSource::default());
        let cache = Arc::new(StatusCache::new(Duration::from_secs(5), source.clone()));

        // only meaningful when the temp dir is not itself inside a repository
        if RepoRootCache::unbounded().find(dir.path()).is_none() {
            assert_eq!(cache.get_status_async(&file).await, StatusKind::NotInRepo);
            assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        }
        assert_eq!(
            cache.get_status_async(&dir.path().join("missing")).await,
            StatusKind::NotInRepo
        );
    }

    #[test]
    fn test_rescan_replaces_only_its_repository() {
        let one = repo();
        let two = repo();
        let source = Arc::new(FakeSource::default());
        let cache = StatusCache::new(Duration::from_secs(60), source.clone());

        source.set(Some(" M src/a.txt\n"));
        assert!(cache.rescan(one.path()));
        source.set(Some("D  src/b.txt\n"));
        assert!(cache.rescan(two.path()));

        source.set(Some(""));
        assert!(cache.rescan(one.path()));

        assert_eq!(cache.get_status(&one.path().join("src/a.txt")), StatusKind::Unmodified);
        assert_eq!(cache.get_status(&two.path().join("src/b.txt")), StatusKind::Deleted);
        assert_eq!(
            cache.directory_summary(&two.path().join("src")),
            Some(StatusKind::Deleted)
        );
        assert_eq!(cache.directory_summary(&one.path().join("src")), None);
    }

    #[test]
    fn test_evict_and_mark_stale() {
        let dir = repo();
        let source = Arc::new(FakeSource::default());
        source.set(Some(" M src/a.txt\n"));
        let cache = StatusCache::new(Duration::from_secs(60), source.clone());
        assert!(cache.rescan(dir.path()));
        assert!(!cache.is_stale(dir.path()));

        cache.mark_stale();
        assert!(cache.is_stale(dir.path()));

        cache.evict(dir.path());
        assert_eq!(cache.repository_count(), 0);
        assert_eq!(cache.get_status(&dir.path().join("src/a.txt")), StatusKind::NotInRepo);
    }

    #[tokio::test]
    async fn test_directory_reports_most_significant_entry_below() {
        let dir = repo();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::create_dir(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/c.txt"), "c").unwrap();
        let source = Arc::new(FakeSource::default());
        source.set(Some(" M src/a.txt
?? src/nested/c.txt
"));
        let cache = Arc::new(StatusCache::new(Duration::from_secs(60), source.clone()));
        let src = dir.path().join("src");

        assert_eq!(cache.get_status_async(&src).await, StatusKind::Modified);
        assert_eq!(cache.get_status(&src), StatusKind::Modified);
        assert_eq!(cache.get_status(&src.join("nested")), StatusKind::Untracked);
        assert_eq!(cache.get_status(dir.path()), StatusKind::Modified);
        assert_eq!(
            cache.get_status_async(&dir.path().join("docs")).await,
            StatusKind::Unmodified
        );
        assert_eq!(cache.get_status(&src.join("b.txt")), StatusKind::Unmodified);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_share_one_rescan() {
        let dir = repo();
        let source = Arc::new(FakeSource::default());
        source.set(Some(" M src/a.txt
"));
        let cache = Arc::new(StatusCache::new(Duration::from_secs(60), source.clone()));
        let file = dir.path().join("src/a.txt");

        let mut queries = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let file = file.clone();
            queries.spawn(async move { cache.get_status_async(&file).await });
        }
        while let Some(status) = queries.join_next().await {
            assert_eq!(status.unwrap(), StatusKind::Modified);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_full_rescan() {
        let dir = repo();
        let source = Arc::new(FakeSource::default());
        source.set(Some(" M src/a.txt
"));
        let cache = Arc::new(StatusCache::new(Duration::from_secs(60), source.clone()));
        let file = dir.path().join("src/a.txt");
        assert_eq!(cache.get_status_async(&file).await, StatusKind::Modified);

        cache.invalidate();
        assert_eq!(cache.repository_count(), 0);
        assert_eq!(cache.get_status(&file), StatusKind::NotInRepo);

        source.set(Some(""));
        assert_eq!(cache.get_status_async(&file).await, StatusKind::Unmodified);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
