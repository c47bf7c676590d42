pub mod cache;
pub mod command;
pub mod parse;

pub use cache::StatusCache;
pub use command::{GitStatusCommand, StatusSource};
pub use parse::{StatusLine, classify, parse_porcelain};

/// Version-control state of a file or directory. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    /// Not inside a repository, or nothing known yet.
    #[default]
    NotInRepo,
    /// Present on disk, never added.
    Untracked,
    /// Matched by an ignore rule and reported as such.
    Ignored,
    /// Tracked and clean.
    Unmodified,
    /// Changed in the working tree.
    Modified,
    /// Modified and staged in the index.
    Staged,
    /// Newly added to the index.
    Added,
    /// Deleted in the index or the working tree.
    Deleted,
    /// Renamed in the index.
    Renamed,
    /// Unmerged.
    Conflicted,
}

impl StatusKind {
    /// Human-readable label, `None` where no badge is shown.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::NotInRepo => None,
            Self::Unmodified => Some("Unchanged"),
            Self::Modified => Some("Pending - Edit"),
            Self::Staged => Some("Staged"),
            Self::Added => Some("Pending - Add"),
            Self::Untracked => Some("Untracked"),
            Self::Deleted => Some("Pending - Delete"),
            Self::Conflicted => Some("Merge Conflict"),
            Self::Ignored => Some("Ignored"),
            Self::Renamed => Some("Pending - Rename"),
        }
    }

    /// One-character badge for compact output.
    pub fn symbol(self) -> Option<char> {
        match self {
            Self::NotInRepo | Self::Unmodified => None,
            Self::Untracked => Some('?'),
            Self::Ignored => Some('!'),
            Self::Modified => Some('M'),
            Self::Staged => Some('S'),
            Self::Added => Some('A'),
            Self::Deleted => Some('D'),
            Self::Renamed => Some('R'),
            Self::Conflicted => Some('U'),
        }
    }

    /// Ordering used when summarising a directory from the entries below it.
    pub fn significance(self) -> u8 {
        match self {
            Self::NotInRepo => 0,
            Self::Unmodified => 1,
            Self::Ignored => 2,
            Self::Untracked => 3,
            Self::Staged => 4,
            Self::Added => 5,
            Self::Renamed => 6,
            Self::Modified => 7,
            Self::Deleted => 8,
            Self::Conflicted => 9,
        }
    }
}
