use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// State directory name (created in the workspace directory).
pub const STATE_DIR: &str = ".workspace-files";
/// State file name within STATE_DIR.
pub const STATE_FILE: &str = "state.toml";

/// Workspace-scoped string variables.
///
/// A variable set with `persist = false` is visible for the lifetime of the
/// store but not written out, so a later load does not see it.
pub trait VariableStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, persist: bool) -> Result<(), ConfigError>;
}

#[derive(Debug, Clone)]
struct Variable {
    value: String,
    persist: bool,
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

/// Build the state file path for a workspace: `<workspace>/.workspace-files/state.toml`
pub fn state_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(STATE_DIR).join(STATE_FILE)
}

/// Variables kept in a TOML file, rewritten atomically on every change.
pub struct FileVariableStore {
    path: PathBuf,
    vars: Mutex<BTreeMap<String, Variable>>,
}

impl FileVariableStore {
    /// Load the state of `workspace_dir`. A missing file is an empty store.
    pub fn load(workspace_dir: &Path) -> Result<Self, ConfigError> {
        let path = state_path(workspace_dir);
        let mut vars = BTreeMap::new();

        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let state: StateFile =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            if state.version != STATE_VERSION {
                debug!(found = state.version, expected = STATE_VERSION, "state version mismatch, starting empty");
            } else {
                for (name, value) in state.variables {
                    vars.insert(name, Variable { value, persist: true });
                }
            }
        }

        Ok(Self {
            path,
            vars: Mutex::new(vars),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the persisted variables to a temp file first, then rename it
    /// over the state file.
    fn save(&self, vars: &BTreeMap<String, Variable>) -> Result<(), ConfigError> {
        let state = StateFile {
            version: STATE_VERSION,
            variables: vars
                .iter()
                .filter(|(_, v)| v.persist)
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
        };
        let encoded = toml::to_string(&state)?;

        let write_err = |source: std::io::Error| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(encoded.as_bytes()).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl VariableStore for FileVariableStore {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.lock().get(name).map(|v| v.value.clone())
    }

    fn set(&self, name: &str, value: &str, persist: bool) -> Result<(), ConfigError> {
        let mut vars = self.vars.lock();
        let was_persisted = vars.get(name).is_some_and(|v| v.persist);
        vars.insert(
            name.to_owned(),
            Variable {
                value: value.to_owned(),
                persist,
            },
        );
        if persist || was_persisted {
            self.save(&vars)?;
        }
        Ok(())
    }
}

/// Store that never touches the disk.
#[derive(Default)]
pub struct MemoryVariableStore {
    vars: Mutex<BTreeMap<String, String>>,
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str, _persist: bool) -> Result<(), ConfigError> {
        self.vars.lock().insert(name.to_owned(), value.to_owned());
        Ok(())
    }
}
