use std::path::PathBuf;

/// Failure of a destructive filesystem operation (create, delete, rename, move).
///
/// These are the only errors the tree surfaces to the user; everything else is
/// absorbed and logged where it happens.
#[derive(Debug, thiserror::Error)]
pub enum FsOpError {
    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("'{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("'{0}' does not exist")]
    NotFound(PathBuf),

    #[error("{0} cannot be {1}")]
    Unsupported(PathBuf, &'static str),

    #[error("{op} '{path}' failed: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reading or writing workspace configuration and state files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
