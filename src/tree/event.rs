use std::path::PathBuf;

use serde::Serialize;

use crate::status::StatusKind;

/// Stable identity of a node for the lifetime of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Identity used for notifications about the root collection itself.
    pub const WORKSPACE: NodeId = NodeId(0);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What changed on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "kebab-case")]
pub enum TreeChange {
    /// The "has children" flag was (re)computed.
    HasItems { has_items: bool },
    /// The child list was replaced.
    Items {
        added: usize,
        removed: usize,
        total: usize,
    },
    Status { status: StatusKind },
    Cut { cut: bool },
    Disposed,
    /// The configured root set or the root collection changed.
    Roots { total: usize },
}

/// Change notification delivered to every subscriber of a workspace.
///
/// Always emitted from the dispatcher, in the order the changes were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEvent {
    pub id: NodeId,
    pub path: PathBuf,
    #[serde(flatten)]
    pub change: TreeChange,
}
