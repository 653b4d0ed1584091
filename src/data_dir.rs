use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "RAGNOVA_DATA_DIR";

/// Where ragnova keeps its settings and its vector store snapshot.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The RAGNOVA_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/ragnova/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV_VAR) {
                Some(val) if !val.is_empty() => PathBuf::from(val),
                _ => xdg::BaseDirectories::with_prefix("ragnova")
                    .get_data_home()
                    .ok_or_else(|| {
                        Error::Config(
                            "could not determine XDG data home directory"
                                .into(),
                        )
                    })?,
            },
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// The vector index and metadata snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join("snapshot.redb")
    }
}
