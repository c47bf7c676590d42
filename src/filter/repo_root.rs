use std::path::{Path, PathBuf};

use dashmap::DashMap;

use super::VCS_DIR;

/// Upward search for the directory containing `.git`, cached by starting directory.
pub struct RepoRootCache {
    max_depth: Option<usize>,
    roots: DashMap<PathBuf, Option<PathBuf>>,
}

impl RepoRootCache {
    /// Search at most `max_depth` directories, starting with the given one.
    pub fn bounded(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            roots: DashMap::new(),
        }
    }

    /// Walk all the way to the filesystem root.
    pub fn unbounded() -> Self {
        Self {
            max_depth: None,
            roots: DashMap::new(),
        }
    }

    /// The enclosing repository root of `start`. Both hits and misses are cached.
    pub fn find(&self, start: &Path) -> Option<PathBuf> {
        if let Some(cached) = self.roots.get(start) {
            return cached.value().clone();
        }

        let found = self.walk(start);
        self.roots.insert(start.to_path_buf(), found.clone());
        found
    }

    fn walk(&self, start: &Path) -> Option<PathBuf> {
        let mut current = Some(start);
        let mut depth = 0;
        while let Some(dir) = current {
            if self.max_depth.is_some_and(|max| depth >= max) {
                return None;
            }
            if dir.join(VCS_DIR).exists() {
                return Some(dir.to_path_buf());
            }
            current = dir.parent();
            depth += 1;
        }
        None
    }

    pub fn evict(&self, scope: &Path) {
        self.roots.retain(|k, _| !k.starts_with(scope));
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
