use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// A live, filtered, git-aware view of the files in one or more workspace roots.
///
/// workspace-files composes the configured root directories into a single tree,
/// hides reserved and configured entries, dims `.gitignore`d ones and tags each
/// node with its git status.
#[derive(Parser, Debug)]
#[command(
    name = "workspace-files",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    /// Workspace directory holding `workspace-files.toml` and the persisted roots.
    #[arg(long, short = 'w', global = true, default_value = ".")]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Indented tree or one line per result (default).
    #[default]
    Compact,
    /// Structured JSON suitable for programmatic consumption.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the tree of every configured root.
    ///
    /// Cut (gitignored) entries are prefixed with `~`; changed entries carry a
    /// one-letter status badge.
    Tree {
        /// Print the subtree at this path.
        path: Option<PathBuf>,

        /// Levels to expand below each root.
        #[arg(long, short, default_value_t = 2)]
        depth: usize,

        /// Refresh git status of every printed node before output.
        #[arg(long)]
        status: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Find entries whose name contains QUERY (case-insensitive), shallowest first.
    Search {
        query: String,

        /// Search only below this directory.
        path: Option<PathBuf>,

        /// Maximum number of results. Defaults to `search_limit` from the config.
        #[arg(long, short)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Print the git status of a file or directory.
    Status {
        path: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Manage the persisted set of root directories.
    Roots {
        #[command(subcommand)]
        action: RootsAction,
    },

    /// Keep the tree live and print every change notification until Ctrl-C.
    Watch {
        /// Follow only the subtree at this directory.
        path: Option<PathBuf>,

        /// Levels to expand (and therefore watch) below each root.
        #[arg(long, short, default_value_t = 1)]
        depth: usize,

        /// Stop after this many notifications.
        #[arg(long)]
        max_events: Option<usize>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Create an empty file.
    NewFile {
        /// Directory to create the file in.
        dir: PathBuf,
        name: String,
    },

    /// Create a folder.
    NewFolder {
        /// Directory to create the folder in.
        dir: PathBuf,
        name: String,
    },

    /// Delete a file or folder (recursively).
    Delete { path: PathBuf },

    /// Rename a file or folder within its directory.
    Rename { path: PathBuf, new_name: String },

    /// Move files or folders into a directory.
    Move {
        dir: PathBuf,
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RootsAction {
    /// List the configured roots.
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },
    /// Add a root directory.
    Add { dir: PathBuf },
    /// Remove a root directory.
    Remove { dir: PathBuf },
}
