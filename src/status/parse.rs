use std::path::{MAIN_SEPARATOR, PathBuf};

use super::StatusKind;

/// One entry of `git status --porcelain=v1` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// `X`: state of the index.
    pub index: char,
    /// `Y`: state of the working tree.
    pub worktree: char,
    /// Repository-relative path with native separators. For renames, the destination.
    pub path: PathBuf,
}

impl StatusLine {
    pub fn kind(&self) -> StatusKind {
        classify(self.index, self.worktree)
    }
}

/// Parse porcelain v1 output (`XY path` or `XY old -> new`).
///
/// Lines shorter than three characters are skipped; quotes around paths are
/// stripped and forward slashes replaced by the native separator. Directory
/// summaries (`?? dir/`) keep their path without the trailing separator.
pub fn parse_porcelain(output: &str) -> Vec<StatusLine> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<StatusLine> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[0].is_ascii() || !bytes[1].is_ascii() {
        return None;
    }

    let index = bytes[0] as char;
    let worktree = bytes[1] as char;
    let mut raw = line.get(3..)?.trim().trim_matches('"');

    if let Some((_, destination)) = raw.split_once(" -> ") {
        raw = destination.trim().trim_matches('"');
    }

    let normalized: String = raw
        .chars()
        .map(|c| if c == '/' { MAIN_SEPARATOR } else { c })
        .collect();
    let normalized = normalized.trim_end_matches(MAIN_SEPARATOR);
    if normalized.is_empty() {
        return None;
    }

    Some(StatusLine {
        index,
        worktree,
        path: PathBuf::from(normalized),
    })
}

/// Map an `XY` pair to a status kind.
///
/// Precedence: unmerged pairs first, then the working tree, then the index.
pub fn classify(index: char, worktree: char) -> StatusKind {
    let conflicted = index == 'U'
        || worktree == 'U'
        || (index == 'A' && worktree == 'A')
        || (index == 'D' && worktree == 'D');
    if conflicted {
        return StatusKind::Conflicted;
    }

    match worktree {
        'M' => StatusKind::Modified,
        'D' => StatusKind::Deleted,
        '?' => StatusKind::Untracked,
        '!' => StatusKind::Ignored,
        _ => match index {
            'M' => StatusKind::Staged,
            'A' => StatusKind::Added,
            'D' => StatusKind::Deleted,
            'R' => StatusKind::Renamed,
            _ => StatusKind::Unmodified,
        },
    }
}
