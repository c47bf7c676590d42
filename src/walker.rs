use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::filter::{FilterEngine, is_reserved_name};

/// One visible entry of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
}

/// Enumerate the immediate entries of `dir` that pass the filter.
///
/// Reserved names are rejected on the raw file name before a path is built;
/// the configured globs are applied to the full path afterwards. Symlinks are
/// classified by their target. Any I/O error aborts the whole enumeration so
/// callers can keep their previous state.
pub fn read_entries(dir: &Path, filter: &FilterEngine) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if is_reserved_name(name) {
            continue;
        }

        let path = entry.path();
        if !filter.is_visible(&path) {
            continue;
        }

        let file_type = entry.file_type()?;
        let is_dir = if file_type.is_symlink() {
            fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
        } else {
            file_type.is_dir()
        };

        entries.push(DirEntryInfo {
            path,
            name: name.to_owned(),
            is_dir,
        });
    }

    Ok(entries)
}

/// Whether `dir` has any entry at all, filtered or not.
///
/// Used for the expander of directories that were never enumerated. An
/// unreadable directory reports `true` so the expander stays visible.
pub fn has_any_entry(dir: &Path) -> bool {
    match fs::read_dir(dir) {
        Ok(mut it) => it.next().is_some(),
        Err(_) => true,
    }
}

/// Sort directories before files, each group by case-insensitive name.
pub fn sort_entries<T>(items: &mut [T], key: impl Fn(&T) -> (bool, &str)) {
    items.sort_by_cached_key(|item| {
        let (is_dir, name) = key(item);
        (!is_dir, name.to_lowercase(), name.to_owned())
    });
}
