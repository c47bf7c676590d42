use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::filter::RepoRootCache;

/// Name of the workspace variable holding the configured roots.
pub const ROOTS_VARIABLE: &str = "workspace_roots";

const SEPARATOR: &str = "|";

/// Ordered, de-duplicated set of configured root directories (absolute).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootSet {
    dirs: Vec<PathBuf>,
}

impl RootSet {
    /// Restore from the persisted variable, or fall back to the default root
    /// when nothing was persisted.
    pub fn restore(workspace_dir: &Path, persisted: Option<&str>, repos: &RepoRootCache) -> Self {
        match persisted {
            Some(raw) => Self::parse(workspace_dir, raw),
            None => Self::default_for(workspace_dir, repos),
        }
    }

    /// Parse a `|`-delimited list of paths relative to `workspace_dir`.
    /// Entries that do not resolve to an existing directory are skipped.
    pub fn parse(workspace_dir: &Path, raw: &str) -> Self {
        let mut set = Self::default();
        for part in raw.split(SEPARATOR).map(str::trim).filter(|p| !p.is_empty()) {
            let dir = normalize(&workspace_dir.join(part));
            if !dir.is_dir() {
                debug!(entry = part, "skipping persisted root that no longer exists");
                continue;
            }
            set.insert(dir);
        }
        set
    }

    /// The enclosing repository root of the workspace, or the workspace
    /// directory itself.
    pub fn default_for(workspace_dir: &Path, repos: &RepoRootCache) -> Self {
        let workspace_dir = normalize(workspace_dir);
        let root = repos.find(&workspace_dir).unwrap_or(workspace_dir);
        Self { dirs: vec![root] }
    }

    /// Add `dir` (normalized). Returns false if it was already present.
    pub fn insert(&mut self, dir: impl AsRef<Path>) -> bool {
        let dir = normalize(dir.as_ref());
        if self.dirs.contains(&dir) {
            return false;
        }
        self.dirs.push(dir);
        true
    }

    pub fn remove(&mut self, dir: impl AsRef<Path>) -> bool {
        let dir = normalize(dir.as_ref());
        let before = self.dirs.len();
        self.dirs.retain(|d| *d != dir);
        self.dirs.len() != before
    }

    pub fn contains(&self, dir: impl AsRef<Path>) -> bool {
        self.dirs.contains(&normalize(dir.as_ref()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Serialize relative to `workspace_dir`.
    pub fn to_persisted(&self, workspace_dir: &Path) -> String {
        let base = normalize(workspace_dir);
        self.dirs
            .iter()
            .map(|dir| relative_to(&base, dir).to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

/// Absolute, lexically cleaned path without a trailing separator.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `target` expressed relative to `base`, both absolute and normalized.
fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component> = base.components().collect();
    let target_parts: Vec<Component> = target.components().collect();

    let common = base
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        // different prefix (drive); keep it absolute
        return target.to_path_buf();
    }

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
