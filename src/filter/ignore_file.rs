use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;

/// File name of a VCS ignore file.
pub const IGNORE_FILE: &str = ".gitignore";

/// Nearest-ancestor `.gitignore` resolution with positive and negative caching.
///
/// Lookups are keyed by the directory they originate from. A compiled rule set
/// is additionally cached by its own file path, so sibling directories that
/// resolve to the same `.gitignore` share one matcher.
pub struct IgnoreCache {
    max_depth: usize,
    by_file: DashMap<PathBuf, Arc<Gitignore>>,
    resolved: DashMap<PathBuf, Arc<Gitignore>>,
    missing: DashSet<PathBuf>,
}

impl IgnoreCache {
    /// `max_depth` bounds how many directories (starting with the originating
    /// one) are searched for an ignore file.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            by_file: DashMap::new(),
            resolved: DashMap::new(),
            missing: DashSet::new(),
        }
    }

    /// The rule set that applies to entries of `dir`, if any.
    pub fn resolve(&self, dir: &Path) -> Option<Arc<Gitignore>> {
        if self.missing.contains(dir) {
            return None;
        }
        if let Some(found) = self.resolved.get(dir) {
            return Some(Arc::clone(&found));
        }

        let mut current = Some(dir);
        let mut depth = 0;
        while let Some(candidate) = current {
            if depth >= self.max_depth {
                break;
            }
            let ignore_path = candidate.join(IGNORE_FILE);

            if let Some(cached) = self.by_file.get(&ignore_path) {
                let rules = Arc::clone(&cached);
                drop(cached);
                self.resolved.insert(dir.to_path_buf(), Arc::clone(&rules));
                return Some(rules);
            }

            if ignore_path.is_file() {
                return match compile(candidate, &ignore_path) {
                    Some(rules) => {
                        let rules = Arc::new(rules);
                        self.by_file.insert(ignore_path, Arc::clone(&rules));
                        self.resolved.insert(dir.to_path_buf(), Arc::clone(&rules));
                        Some(rules)
                    }
                    None => {
                        self.missing.insert(dir.to_path_buf());
                        None
                    }
                };
            }

            current = candidate.parent();
            depth += 1;
        }

        self.missing.insert(dir.to_path_buf());
        None
    }

    /// Whether `path` (or one of its parents below the ignore file's directory)
    /// is matched by the nearest ignore file.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(dir) = path.parent() else {
            return false;
        };
        let Some(rules) = self.resolve(dir) else {
            return false;
        };
        // matched_path_or_any_parents requires the path to live under the rule root
        if !path.starts_with(rules.path()) || path == rules.path() {
            return false;
        }
        rules.matched_path_or_any_parents(path, is_dir).is_ignore()
    }

    /// Remove every cached entry whose key lies under `scope`.
    pub fn evict(&self, scope: &Path) {
        self.by_file.retain(|k, _| !k.starts_with(scope));
        self.resolved.retain(|k, _| !k.starts_with(scope));
        self.missing.retain(|k| !k.starts_with(scope));
    }

    /// Number of cached lookups (positive and negative).
    pub fn len(&self) -> usize {
        self.resolved.len() + self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile(root: &Path, ignore_path: &Path) -> Option<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(ignore_path) {
        // partial errors still leave the valid lines in the builder
        debug!(path = %ignore_path.display(), %err, "ignore file has invalid lines");
    }
    match builder.build() {
        Ok(rules) => Some(rules),
        Err(err) => {
            debug!(path = %ignore_path.display(), %err, "failed to compile ignore file");
            None
        }
    }
}
