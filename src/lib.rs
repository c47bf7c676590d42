pub mod cli;
pub mod config;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod ops;
pub mod output;
pub mod search;
pub mod status;
pub mod tree;
pub mod walker;
pub mod watcher;
pub mod workspace;

pub use config::WorkspaceConfig;
pub use error::{ConfigError, FsOpError};
pub use search::SearchHit;
pub use status::StatusKind;
pub use tree::{NodeKind, TreeEvent, TreeNode};
pub use workspace::{Workspace, WorkspaceOptions};
