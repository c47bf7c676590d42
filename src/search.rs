//! Bounded breadth-first name search over the tree.
//!
//! Each level is expanded in parallel on the rayon pool; results are handed to
//! the caller's sink on the calling thread, shallowest first. The traversal
//! reads the live tree but never materializes, reconciles or re-parents a
//! node: unexpanded directories are enumerated into detached nodes.

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::status::StatusKind;
use crate::tree::{NodeKind, TreeNode};

/// A node reached by the search and the chain of nodes leading to it.
struct Trail {
    node: Arc<TreeNode>,
    parent: Option<Arc<Trail>>,
}

/// One search result.
#[derive(Clone)]
pub struct SearchHit {
    trail: Arc<Trail>,
}

impl SearchHit {
    pub fn node(&self) -> &Arc<TreeNode> {
        &self.trail.node
    }

    /// Nodes from the root down to (and including) the hit.
    pub fn chain(&self) -> Vec<Arc<TreeNode>> {
        let mut chain = Vec::new();
        let mut cursor = Some(&self.trail);
        while let Some(trail) = cursor {
            chain.push(Arc::clone(&trail.node));
            cursor = trail.parent.as_ref();
        }
        chain.reverse();
        chain
    }

    /// Number of levels below the root it was found at.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.trail.parent.as_ref();
        while let Some(trail) = cursor {
            depth += 1;
            cursor = trail.parent.as_ref();
        }
        depth
    }

    /// Path relative to the root the hit was found under.
    pub fn relative_path(&self) -> PathBuf {
        self.chain().iter().skip(1).map(|n| n.name()).collect()
    }

    pub fn summary(&self) -> HitSummary {
        let node = self.node();
        let chain = self.chain();
        HitSummary {
            name: node.name().to_owned(),
            path: node.path().to_path_buf(),
            relative: self.relative_path(),
            root: chain.first().map(|r| r.path().to_path_buf()).unwrap_or_default(),
            kind: node.kind(),
            status: node.status(),
            cut: node.is_cut(),
        }
    }
}

/// Serializable view of a [`SearchHit`].
#[derive(Debug, Clone, Serialize)]
pub struct HitSummary {
    pub name: String,
    pub path: PathBuf,
    pub relative: PathBuf,
    pub root: PathBuf,
    pub kind: NodeKind,
    pub status: StatusKind,
    pub cut: bool,
}

/// Case-insensitive substring match on the node name.
fn matches(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(needle)
}

/// Search `roots` level by level for names containing `query`.
///
/// At most `limit` hits are passed to `emit`, in level order and within a
/// level in sibling order; once the cap is reached no further directory is
/// enumerated. Returns the number of hits emitted.
pub fn search<F>(roots: &[Arc<TreeNode>], query: &str, limit: usize, mut emit: F) -> usize
where
    F: FnMut(SearchHit),
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() || limit == 0 {
        return 0;
    }

    let mut level: Vec<Arc<Trail>> = roots
        .iter()
        .filter(|node| !node.is_disposed())
        .map(|node| {
            Arc::new(Trail {
                node: Arc::clone(node),
                parent: None,
            })
        })
        .collect();
    let mut emitted = 0;

    while !level.is_empty() {
        let hits: Vec<bool> = level
            .par_iter()
            .map(|trail| matches(trail.node.name(), &needle))
            .collect();
        for (trail, _) in level.iter().zip(hits).filter(|(_, hit)| *hit) {
            emit(SearchHit {
                trail: Arc::clone(trail),
            });
            emitted += 1;
            if emitted == limit {
                return emitted;
            }
        }

        level = level
            .par_iter()
            .filter(|trail| trail.node.kind().can_have_children())
            .flat_map_iter(|trail| {
                trail
                    .node
                    .children_for_search()
                    .into_iter()
                    .map(move |child| {
                        Arc::new(Trail {
                            node: child,
                            parent: Some(Arc::clone(trail)),
                        })
                    })
            })
            .collect();
    }

    emitted
}

/// Run [`search`] from `starts` on the blocking pool and collect the hits.
pub async fn collect(starts: Vec<Arc<TreeNode>>, query: &str, limit: usize) -> Vec<SearchHit> {
    let query = query.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut hits = Vec::new();
        search(&starts, &query, limit, |hit| hits.push(hit));
        hits
    })
    .await
    .unwrap_or_default()
}
