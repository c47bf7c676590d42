use std::path::{Path, PathBuf};

use crate::filter::is_reserved_path;

/// A change reported inside a watched directory, after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Directory whose subscribers are told about the change.
    pub dir: PathBuf,
    /// The path that changed (created, modified, deleted or renamed).
    pub path: PathBuf,
}

/// Classify a raw event path, or `None` if it should be dropped.
///
/// Paths below VCS metadata, editor state, dependency folders or temp
/// locations never reach a subscriber. Subscriptions are non-recursive, so
/// the change belongs to the parent directory of the path.
pub fn classify_event(path: &Path) -> Option<WatchEvent> {
    if is_reserved_path(path) {
        return None;
    }
    let dir = path.parent()?;
    if dir.as_os_str().is_empty() {
        return None;
    }
    Some(WatchEvent {
        dir: dir.to_path_buf(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_paths_are_dropped() {
        assert_eq!(classify_event(Path::new("/w/.git/index.lock")), None);
        assert_eq!(classify_event(Path::new("/w/node_modules/x/y.js")), None);
        assert_eq!(classify_event(Path::new("/w/src/~$draft.docx")), None);
        assert_eq!(classify_event(Path::new("/w/.tmp/build")), None);
    }

    #[test]
    fn test_event_is_routed_to_parent_directory() {
        let event = classify_event(Path::new("/w/src/main.rs")).unwrap();
        assert_eq!(event.dir, PathBuf::from("/w/src"));
        assert_eq!(event.path, PathBuf::from("/w/src/main.rs"));
        assert_eq!(classify_event(Path::new("/")), None);
    }
}
