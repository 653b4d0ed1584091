use std::{fmt, path::Path, str::FromStr};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
    model_manager::DEFAULT_MODEL_ID,
    store::StoreOptions,
    vector_index::IndexKind,
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const KEY_MODEL: &str = "model";
pub const KEY_EMBEDDER: &str = "embedder";
pub const KEY_CHUNK_SIZE: &str = "chunk_size";
pub const KEY_OVERLAP: &str = "overlap";
pub const KEY_INDEX: &str = "index";

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

/// Which embedding backend produces vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmbedderKind {
    /// The ColBERT model via pylate-rs.
    #[default]
    Colbert,
    /// The offline feature-hashing embedder.
    Hash,
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Colbert => f.write_str("colbert"),
            Self::Hash => f.write_str("hash"),
        }
    }
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(Self::Colbert),
            "hash" => Ok(Self::Hash),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected colbert or hash)"
            ))),
        }
    }
}

/// Values given on the command line, which win over stored settings.
#[derive(Debug, Clone, Default)]
pub struct SettingOverrides {
    pub model: Option<String>,
    pub embedder: Option<EmbedderKind>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
}

/// Effective configuration after layering overrides, stored settings and
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub model: String,
    pub embedder: EmbedderKind,
    pub chunking: ChunkingConfig,
    pub index_kind: IndexKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_ID.to_string(),
            embedder: EmbedderKind::default(),
            chunking: ChunkingConfig::default(),
            index_kind: IndexKind::default(),
        }
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "setting '{key}' must be an integer, got '{value}'"
        ))
    })
}

fn stored_usize(db: &ConfigDb, key: &str, default: usize) -> Result<usize> {
    db.get_setting(key)?
        .map(|v| parse_usize(key, &v))
        .transpose()
        .map(|v| v.unwrap_or(default))
}

impl Settings {
    /// Chunk settings are not validated here; commands that chunk text check
    /// them when the store opens.
    pub fn resolve(
        db: &ConfigDb,
        overrides: &SettingOverrides,
    ) -> Result<Self> {
        let model = match &overrides.model {
            Some(model) => model.clone(),
            None => match db.get_setting(KEY_MODEL)? {
                Some(model) => model,
                None => std::env::var(crate::model_manager::MODEL_ENV_VAR)
                    .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string()),
            },
        };

        let embedder = match overrides.embedder {
            Some(kind) => kind,
            None => db
                .get_setting(KEY_EMBEDDER)?
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
        };

        let chunk_size = match overrides.chunk_size {
            Some(n) => n,
            None => stored_usize(db, KEY_CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?,
        };
        let overlap = match overrides.overlap {
            Some(n) => n,
            None => stored_usize(db, KEY_OVERLAP, DEFAULT_CHUNK_OVERLAP)?,
        };
        let chunking = ChunkingConfig {
            chunk_size,
            overlap,
        };

        let index_kind = db
            .get_setting(KEY_INDEX)?
            .map(|v| v.parse::<IndexKind>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            model,
            embedder,
            chunking,
            index_kind,
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            chunking: self.chunking,
            index_kind: self.index_kind,
        }
    }

    /// Options for commands that never chunk text, such as query and status.
    /// Stored chunk settings are ignored.
    pub fn read_options(&self) -> StoreOptions {
        StoreOptions {
            chunking: ChunkingConfig::default(),
            index_kind: self.index_kind,
        }
    }
}

/// Reject unknown keys, unparsable values, and chunk settings that would not
/// form a valid pair with what is already stored.
pub fn validate_setting(db: &ConfigDb, key: &str, value: &str) -> Result<()> {
    match key {
        KEY_MODEL => {
            if value.trim().is_empty() {
                return Err(Error::Config("model must not be empty".into()));
            }
        }
        KEY_EMBEDDER => {
            value.parse::<EmbedderKind>()?;
        }
        KEY_CHUNK_SIZE => {
            let overlap =
                stored_usize(db, KEY_OVERLAP, DEFAULT_CHUNK_OVERLAP)?;
            check_chunking(parse_usize(key, value)?, overlap)?;
        }
        KEY_OVERLAP => {
            let chunk_size =
                stored_usize(db, KEY_CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?;
            check_chunking(chunk_size, parse_usize(key, value)?)?;
        }
        KEY_INDEX => {
            value.parse::<IndexKind>()?;
        }
        other => {
            return Err(Error::NotFound {
                kind: "setting",
                name: other.to_string(),
            });
        }
    }
    Ok(())
}

fn check_chunking(chunk_size: usize, overlap: usize) -> Result<()> {
    ChunkingConfig {
        chunk_size,
        overlap,
    }
    .validate()
    .map_err(|e| {
        Error::InvalidConfiguration(format!(
            "{e}; adjust {KEY_CHUNK_SIZE} and {KEY_OVERLAP} together"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("model").unwrap(), None);

        db.set_setting("model", "custom-model").unwrap();
        assert_eq!(
            db.get_setting("model").unwrap(),
            Some("custom-model".to_string())
        );
        assert_eq!(db.list_settings().unwrap().len(), 1);

        assert!(db.remove_setting("model").unwrap());
        assert!(!db.remove_setting("model").unwrap());
        assert_eq!(db.list_settings().unwrap(), vec![]);
    }

    #[test]
    fn reopen_preserves_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_setting(KEY_CHUNK_SIZE, "256").unwrap();
        }

        let db = ConfigDb::open(&path).unwrap();
        assert_eq!(
            db.get_setting(KEY_CHUNK_SIZE).unwrap(),
            Some("256".to_string())
        );
    }

    #[test]
    fn resolve_uses_defaults() {
        let (_tmp, db) = test_db();
        let settings = Settings::resolve(
            &db,
            &SettingOverrides {
                model: Some("m".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(settings.model, "m");
        assert_eq!(settings.embedder, EmbedderKind::Colbert);
        assert_eq!(settings.chunking, ChunkingConfig::default());
        assert_eq!(settings.index_kind, IndexKind::Exact);
    }

    #[test]
    fn overrides_win_over_stored_settings() {
        let (_tmp, db) = test_db();
        db.set_setting(KEY_EMBEDDER, "hash").unwrap();
        db.set_setting(KEY_CHUNK_SIZE, "500").unwrap();
        db.set_setting(KEY_OVERLAP, "50").unwrap();
        db.set_setting(KEY_INDEX, "approximate:8:2").unwrap();

        let stored =
            Settings::resolve(&db, &SettingOverrides::default()).unwrap();
        assert_eq!(stored.embedder, EmbedderKind::Hash);
        assert_eq!(stored.chunking.chunk_size, 500);
        assert_eq!(stored.chunking.overlap, 50);
        assert_eq!(
            stored.index_kind,
            IndexKind::Approximate {
                lists: 8,
                probes: 2
            }
        );

        let overridden = Settings::resolve(
            &db,
            &SettingOverrides {
                embedder: Some(EmbedderKind::Colbert),
                chunk_size: Some(100),
                overlap: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(overridden.embedder, EmbedderKind::Colbert);
        assert_eq!(overridden.chunking.chunk_size, 100);
        assert_eq!(overridden.chunking.overlap, 10);
    }

    #[test]
    fn invalid_chunking_only_fails_chunking_options() {
        let (_tmp, db) = test_db();
        let settings = Settings::resolve(
            &db,
            &SettingOverrides {
                chunk_size: Some(10),
                overlap: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        let err = settings.store_options().validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(settings.read_options().validate().is_ok());
    }

    #[test]
    fn resolve_rejects_garbage_stored_values() {
        let (_tmp, db) = test_db();
        db.set_setting(KEY_CHUNK_SIZE, "lots").unwrap();
        let err =
            Settings::resolve(&db, &SettingOverrides::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_setting_checks_keys_and_values() {
        let (_tmp, db) = test_db();
        assert!(validate_setting(&db, KEY_EMBEDDER, "hash").is_ok());
        assert!(validate_setting(&db, KEY_EMBEDDER, "word2vec").is_err());
        assert!(validate_setting(&db, KEY_INDEX, "approximate").is_ok());
        assert!(validate_setting(&db, KEY_OVERLAP, "-1").is_err());
        assert!(matches!(
            validate_setting(&db, "colour", "blue"),
            Err(Error::NotFound { kind: "setting", .. })
        ));
    }

    #[test]
    fn chunk_settings_are_checked_against_stored_pair() {
        let (_tmp, db) = test_db();
        // default overlap is larger than 64
        assert!(matches!(
            validate_setting(&db, KEY_CHUNK_SIZE, "64"),
            Err(Error::InvalidConfiguration(_))
        ));
        let too_wide = DEFAULT_CHUNK_SIZE.to_string();
        assert!(matches!(
            validate_setting(&db, KEY_OVERLAP, &too_wide),
            Err(Error::InvalidConfiguration(_))
        ));

        validate_setting(&db, KEY_OVERLAP, "16").unwrap();
        db.set_setting(KEY_OVERLAP, "16").unwrap();
        validate_setting(&db, KEY_CHUNK_SIZE, "64").unwrap();
        db.set_setting(KEY_CHUNK_SIZE, "64").unwrap();

        assert!(validate_setting(&db, KEY_OVERLAP, "64").is_err());
        let settings =
            Settings::resolve(&db, &SettingOverrides::default()).unwrap();
        assert!(settings.store_options().validate().is_ok());
    }

    #[test]
    fn embedder_kind_parses_case_insensitively() {
        assert_eq!("HASH".parse::<EmbedderKind>().unwrap(), EmbedderKind::Hash);
        assert_eq!(EmbedderKind::Colbert.to_string(), "colbert");
    }
}
