use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::search::{HitSummary, SearchHit};
use crate::status::StatusKind;
use crate::tree::{NodeKind, TreeEvent, TreeNode};

/// Serializable snapshot of a node and its materialized descendants.
#[derive(Debug, Serialize)]
pub struct TreeView {
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
    pub status: StatusKind,
    pub cut: bool,
    pub has_items: bool,
    pub capabilities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeView>,
}

impl TreeView {
    /// Snapshot `node`, descending at most `depth` materialized levels.
    pub fn capture(node: &TreeNode, depth: usize) -> Self {
        let children = match node.children_snapshot() {
            Some(children) if depth > 0 => children
                .iter()
                .map(|child| Self::capture(child, depth - 1))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            name: node.name().to_owned(),
            path: node.path().to_path_buf(),
            kind: node.kind(),
            status: node.status(),
            cut: node.is_cut(),
            has_items: node.has_items(),
            capabilities: node.kind().capabilities(),
            children,
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error serialising output: {e}"),
    }
}

fn badge(kind: NodeKind, name: &str, cut: bool, status: StatusKind) -> String {
    let mut line = String::new();
    if cut {
        line.push('~');
    }
    line.push_str(name);
    if kind.can_have_children() {
        line.push('/');
    }
    if let Some(symbol) = status.symbol() {
        let _ = write!(line, " [{symbol}]");
    }
    line
}

fn render_view(view: &TreeView, indent: usize, out: &mut String) {
    let _ = writeln!(
        out,
        "{:indent$}{}",
        "",
        badge(view.kind, &view.name, view.cut, view.status),
        indent = indent * 2
    );
    for child in &view.children {
        render_view(child, indent + 1, out);
    }
}

/// Indented compact rendering of one tree per root.
pub fn format_tree(views: &[TreeView]) -> String {
    let mut out = String::new();
    for view in views {
        render_view(view, 0, &mut out);
    }
    out
}

pub fn print_tree(roots: &[Arc<TreeNode>], depth: usize, format: OutputFormat) {
    let views: Vec<TreeView> = roots
        .iter()
        .map(|root| TreeView::capture(root, depth))
        .collect();
    match format {
        OutputFormat::Json => print_json(&views),
        OutputFormat::Compact => print!("{}", format_tree(&views)),
    }
}

pub fn print_search(hits: &[SearchHit], format: OutputFormat) {
    let summaries: Vec<HitSummary> = hits.iter().map(SearchHit::summary).collect();
    match format {
        OutputFormat::Json => print_json(&summaries),
        OutputFormat::Compact => {
            for hit in &summaries {
                println!(
                    "{}",
                    badge(hit.kind, &hit.relative.display().to_string(), hit.cut, hit.status)
                );
            }
        }
    }
}

#[derive(Serialize)]
struct StatusReport<'a> {
    path: &'a Path,
    status: StatusKind,
    label: Option<&'static str>,
}

pub fn print_status(path: &Path, status: StatusKind, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StatusReport {
            path,
            status,
            label: status.label(),
        }),
        OutputFormat::Compact => println!(
            "{}\t{}",
            status.label().unwrap_or("Not in repository"),
            path.display()
        ),
    }
}

pub fn print_roots(roots: &[PathBuf], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(roots),
        OutputFormat::Compact => {
            for root in roots {
                println!("{}", root.display());
            }
        }
    }
}

pub fn print_event(event: &TreeEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error serialising event: {e}"),
        },
        OutputFormat::Compact => println!("{} {} {:?}", event.id, event.path.display(), event.change),
    }
}
