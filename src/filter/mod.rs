//! Visibility and "cut" filtering for tree entries.
//!
//! Visibility is decided by a fixed reserved-name denylist followed by the
//! configured glob patterns; hidden entries are never shown nor watched.
//! The cut (dimmed) state is independent of visibility and comes from the
//! nearest `.gitignore` above the entry.

pub mod ignore_file;
pub mod repo_root;

use std::path::{Component, Path};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use parking_lot::RwLock;
use tracing::warn;

pub use ignore_file::IgnoreCache;
pub use repo_root::RepoRootCache;

use crate::workspace::store::STATE_DIR;

/// Name of the VCS metadata directory.
pub const VCS_DIR: &str = ".git";

/// Directory and file names that are never shown, whatever the configuration.
const RESERVED_NAMES: &[&str] = &["bin", "obj", "node_modules", "packages"];

/// Path segments that make a change notification irrelevant.
const RESERVED_SEGMENTS: &[&str] = &[".git", ".vs", "node_modules", ".tmp", STATE_DIR];

/// Returns true for names excluded before any other filter runs.
///
/// Hidden entries are kept except for the VCS metadata and workspace state
/// directories; temp files (`~` prefix, `.tmp` suffix) and dependency/build
/// output directories are dropped.
pub fn is_reserved_name(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }

    if name.len() > 1 && name.starts_with('.') {
        return name == VCS_DIR || name == STATE_DIR;
    }

    if name.starts_with('~') || ends_with_ignore_case(name, ".tmp") {
        return true;
    }

    RESERVED_NAMES.contains(&name)
}

/// Returns true if any segment of `path` is a reserved segment, or the path
/// contains a `~` anywhere. Used to drop watcher events before debouncing.
pub fn is_reserved_path(path: &Path) -> bool {
    let reserved_segment = path.components().any(|c| {
        c.as_os_str().to_str().is_some_and(|s| {
            RESERVED_SEGMENTS
                .iter()
                .any(|seg| s.eq_ignore_ascii_case(seg))
        })
    });
    reserved_segment || path.to_string_lossy().contains('~')
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name
            .get(name.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// Compiled configured patterns. A path matched by any of them is hidden.
///
/// A pattern is matched against as many trailing path segments as it has
/// itself, so `*.log` sees only the entry name and `web/dist` its parent too.
/// Directories above those segments never take part in the match.
#[derive(Debug, Default)]
pub struct GlobFilter {
    patterns: Vec<SegmentPattern>,
}

#[derive(Debug)]
struct SegmentPattern {
    pattern: Pattern,
    segments: usize,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl GlobFilter {
    /// Compile `patterns`, skipping (and logging) invalid ones.
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|p| p.trim().trim_matches('/'))
            .filter(|p| !p.is_empty())
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(SegmentPattern {
                    pattern,
                    segments: p.split('/').count(),
                }),
                Err(err) => {
                    warn!(pattern = p, %err, "skipping invalid glob pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let names: Vec<_> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy()),
                _ => None,
            })
            .collect();
        self.patterns.iter().any(|p| {
            let tail = &names[names.len().saturating_sub(p.segments)..];
            !tail.is_empty() && p.pattern.matches_with(&tail.join("/"), MATCH_OPTIONS)
        })
    }
}

/// Shared filter state for every node in a workspace.
///
/// The glob matcher is rebuilt once per configuration change and handed out
/// by reference, so nodes never compile patterns themselves.
pub struct FilterEngine {
    globs: RwLock<Arc<GlobFilter>>,
    ignores: Arc<IgnoreCache>,
}

impl FilterEngine {
    pub fn new(globs: GlobFilter, ignores: Arc<IgnoreCache>) -> Self {
        Self {
            globs: RwLock::new(Arc::new(globs)),
            ignores,
        }
    }

    /// Replace the shared glob matcher.
    pub fn set_globs(&self, globs: GlobFilter) {
        *self.globs.write() = Arc::new(globs);
    }

    pub fn globs(&self) -> Arc<GlobFilter> {
        Arc::clone(&self.globs.read())
    }

    pub fn ignores(&self) -> &Arc<IgnoreCache> {
        &self.ignores
    }

    /// Whether an entry at `path` is shown at all.
    pub fn is_visible(&self, path: &Path) -> bool {
        let reserved = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(is_reserved_name);
        !reserved && !self.globs.read().is_match(path)
    }

    /// Whether a visible entry is matched by the nearest `.gitignore` (cut state).
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.ignores.is_ignored(path, is_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_reserved_names() {
        for name in [".git", "node_modules", "bin", "obj", "packages", "~lock", "x.TMP", ""] {
            assert!(is_reserved_name(name), "{name} should be reserved");
        }
        for name in [".gitignore", ".github", "src", "binary", "a.txt", "."] {
            assert!(!is_reserved_name(name), "{name} should not be reserved");
        }
    }

    #[test]
    fn test_reserved_path_matches_whole_segments_only() {
        assert!(is_reserved_path(Path::new("/w/node_modules/pkg/index.js")));
        assert!(is_reserved_path(Path::new("/w/.git/index")));
        assert!(is_reserved_path(Path::new("/w/.vs/state")));
        assert!(is_reserved_path(Path::new("/w/src/file.txt~")));
        assert!(!is_reserved_path(Path::new("/w/src/combine.txt")));
        assert!(!is_reserved_path(Path::new("/w/my.git.notes/a")));
    }

    #[test]
    fn test_invalid_glob_is_skipped() {
        let globs = GlobFilter::new(["*.log", "[", "  ", "web/dist"]);
        assert_eq!(globs.len(), 2);
        assert!(globs.is_match(Path::new("/w/app.LOG")));
        assert!(globs.is_match(Path::new("/w/web/dist")));
        assert!(!globs.is_match(Path::new("/w/api/dist")));
        assert!(!globs.is_match(Path::new("/w/web/src")));
    }

    #[test]
    fn test_glob_ignores_directories_above_the_entry() {
        let globs = GlobFilter::new(["*build*"]);
        assert!(!globs.is_match(Path::new("/home/u/builds/proj/src/main.rs")));
        assert!(!globs.is_match(Path::new("/home/u/builds/proj")));
        assert!(globs.is_match(Path::new("/home/u/builds/proj/build.log")));

        let globs = GlobFilter::new(["src/*.rs"]);
        assert!(globs.is_match(Path::new("/a/src/main.rs")));
        assert!(!globs.is_match(Path::new("/a/src/bin/main.rs")));
        assert!(!globs.is_match(Path::new("/src/x/main.rs")));
    }

    #[test]
    fn test_state_directory_is_hidden() {
        let engine = FilterEngine::new(GlobFilter::default(), Arc::new(IgnoreCache::new(10)));
        assert!(!engine.is_visible(&Path::new("/w").join(STATE_DIR)));
        assert!(is_reserved_path(&Path::new("/w").join(STATE_DIR).join("state.toml")));
    }

    #[test]
    fn test_reserved_names_hidden_regardless_of_globs() {
        let engine = FilterEngine::new(GlobFilter::new(["*.md"]), Arc::new(IgnoreCache::new(10)));
        assert!(!engine.is_visible(Path::new("/w/node_modules")));
        assert!(!engine.is_visible(Path::new("/w/README.md")));
        assert!(engine.is_visible(Path::new("/w/main.rs")));

        engine.set_globs(GlobFilter::default());
        assert!(!engine.is_visible(Path::new("/w/node_modules")));
        assert!(engine.is_visible(Path::new("/w/README.md")));
    }

    #[test]
    fn test_ignored_entry_is_visible_but_cut() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "*.log\ntarget/\n").unwrap();
        fs::create_dir(root.join("target")).unwrap();
        fs::write(root.join("debug.log"), "").unwrap();

        let engine = FilterEngine::new(GlobFilter::default(), Arc::new(IgnoreCache::new(10)));
        let log: PathBuf = root.join("debug.log");
        assert!(engine.is_visible(&log));
        assert!(engine.is_ignored(&log, false));
        assert!(engine.is_ignored(&root.join("target"), true));
        assert!(!engine.is_ignored(&root.join("main.rs"), false));
    }
}
