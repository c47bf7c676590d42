//! Destructive filesystem operations.
//!
//! These are the only operations that report errors. None of them edits the
//! tree directly (apart from marking a deleted node cut); the watcher picks up
//! the change and the affected directories reconcile.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::FsOpError;
use crate::tree::TreeNode;

/// Reject empty names, `.`/`..` and anything containing a path separator.
pub fn validate_name(name: &str) -> Result<(), FsOpError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(FsOpError::InvalidName(name.to_owned()));
    }
    Ok(())
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> FsOpError + 'a {
    move |source| FsOpError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

fn target_in(dir: &Path, name: &str) -> Result<PathBuf, FsOpError> {
    validate_name(name)?;
    if !dir.is_dir() {
        return Err(FsOpError::NotFound(dir.to_path_buf()));
    }
    let target = dir.join(name);
    if target.symlink_metadata().is_ok() {
        return Err(FsOpError::AlreadyExists(target));
    }
    Ok(target)
}

/// Create an empty file `name` in `dir`.
pub fn create_file(dir: &Path, name: &str) -> Result<PathBuf, FsOpError> {
    let target = target_in(dir, name)?;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => FsOpError::AlreadyExists(target.clone()),
            _ => io_err("create", &target)(source),
        })?;
    debug!(path = %target.display(), "file created");
    Ok(target)
}

/// Create a directory `name` in `dir`.
pub fn create_folder(dir: &Path, name: &str) -> Result<PathBuf, FsOpError> {
    let target = target_in(dir, name)?;
    fs::create_dir(&target).map_err(|source| match source.kind() {
        io::ErrorKind::AlreadyExists => FsOpError::AlreadyExists(target.clone()),
        _ => io_err("create", &target)(source),
    })?;
    debug!(path = %target.display(), "folder created");
    Ok(target)
}

/// Delete the file or directory behind `node` and mark the node cut until
/// its parent reconciles it away.
pub fn delete(node: &Arc<TreeNode>) -> Result<(), FsOpError> {
    if !node.kind().can_delete() {
        return Err(FsOpError::Unsupported(node.path().to_path_buf(), "deleted"));
    }
    delete_path(node.path())?;
    node.set_cut(true);
    Ok(())
}

/// Delete `path` (recursively for directories).
pub fn delete_path(path: &Path) -> Result<(), FsOpError> {
    let metadata = path
        .symlink_metadata()
        .map_err(|_| FsOpError::NotFound(path.to_path_buf()))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(io_err("delete", path))?;
    } else {
        fs::remove_file(path).map_err(io_err("delete", path))?;
    }
    debug!(path = %path.display(), "deleted");
    Ok(())
}

/// Rename the entry behind `node` within its directory.
pub fn rename(node: &Arc<TreeNode>, new_name: &str) -> Result<PathBuf, FsOpError> {
    if !node.kind().can_rename() {
        return Err(FsOpError::Unsupported(node.path().to_path_buf(), "renamed"));
    }
    rename_path(node.path(), new_name)
}

/// Rename `path` to `new_name` in the same directory.
pub fn rename_path(path: &Path, new_name: &str) -> Result<PathBuf, FsOpError> {
    validate_name(new_name)?;
    if path.symlink_metadata().is_err() {
        return Err(FsOpError::NotFound(path.to_path_buf()));
    }
    let dir = path
        .parent()
        .ok_or_else(|| FsOpError::Unsupported(path.to_path_buf(), "renamed"))?;
    let target = dir.join(new_name);
    if target == path {
        return Ok(target);
    }
    // a case-only rename reports the source as existing on case-insensitive filesystems
    let case_only = target
        .to_string_lossy()
        .eq_ignore_ascii_case(&path.to_string_lossy());
    if !case_only && target.symlink_metadata().is_ok() {
        return Err(FsOpError::AlreadyExists(target));
    }
    fs::rename(path, &target).map_err(io_err("rename", path))?;
    debug!(from = %path.display(), to = %target.display(), "renamed");
    Ok(target)
}

/// Move every path in `sources` into `dir`. Stops at the first failure;
/// entries moved before it stay moved.
pub fn move_into(dir: &Path, sources: &[PathBuf]) -> Result<Vec<PathBuf>, FsOpError> {
    if !dir.is_dir() {
        return Err(FsOpError::NotFound(dir.to_path_buf()));
    }
    let mut moved = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source
            .file_name()
            .ok_or_else(|| FsOpError::InvalidName(source.display().to_string()))?;
        if dir.starts_with(source) {
            return Err(FsOpError::Unsupported(source.clone(), "moved into itself"));
        }
        if source.symlink_metadata().is_err() {
            return Err(FsOpError::NotFound(source.clone()));
        }
        let target = dir.join(name);
        if target == *source {
            moved.push(target);
            continue;
        }
        if target.symlink_metadata().is_ok() {
            return Err(FsOpError::AlreadyExists(target));
        }
        fs::rename(source, &target).map_err(io_err("move", source))?;
        moved.push(target);
    }
    debug!(dir = %dir.display(), count = moved.len(), "moved");
    Ok(moved)
}

/// Move the entries behind `sources` into the directory behind `target`.
pub fn move_nodes(
    target: &TreeNode,
    sources: &[Arc<TreeNode>],
) -> Result<Vec<PathBuf>, FsOpError> {
    if !target.kind().can_paste() {
        return Err(FsOpError::Unsupported(target.path().to_path_buf(), "a move target"));
    }
    let paths = sources
        .iter()
        .map(|source| {
            if source.kind().can_drag() {
                Ok(source.path().to_path_buf())
            } else {
                Err(FsOpError::Unsupported(source.path().to_path_buf(), "moved"))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    move_into(target.path(), &paths)
}
