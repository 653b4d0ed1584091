use std::path::{Path, PathBuf};

use redb::{
    Database,
    ReadOnlyTable,
    ReadTransaction,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    TableError,
    WriteTransaction,
};

use crate::{
    embedding::Vector,
    error::{Error, Result},
    metadata::{ChunkRecord, MetadataStore},
    vector_index::{IndexKind, VectorIndex},
};

/// Bumped whenever the table layout or value encoding changes.
pub const SNAPSHOT_VERSION: u64 = 1;

const MANIFEST: TableDefinition<&str, u64> = TableDefinition::new("manifest");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

const VERSION_KEY: &str = "version";
const COUNT_KEY: &str = "count";
const DIMENSION_KEY: &str = "dimension";

/// Upper bound on up-front allocation driven by an unverified manifest count.
const PREALLOCATE_LIMIT: usize = 1 << 16;

/// Durable storage for an index and its aligned metadata.
pub trait Persistence: Send + Sync {
    /// Persist both structures as one snapshot. Either the whole snapshot
    /// becomes visible or the previous one stays in place.
    fn save(&self, index: &VectorIndex, metadata: &MetadataStore) -> Result<()>;

    /// Read the last snapshot. `None` means nothing has been persisted yet.
    /// The returned index uses [`IndexKind::Exact`].
    fn load(&self) -> Result<Option<(VectorIndex, MetadataStore)>>;

    /// Remove the persisted snapshot. Succeeds when nothing is persisted.
    fn clear_storage(&self) -> Result<()>;
}

/// A snapshot stored in a single redb database.
///
/// Tables:
/// - `manifest`: `version`, `count` and `dimension`
/// - `vectors`: position → `dimension` native-endian f32 values
/// - `records`: position → JSON-encoded [`ChunkRecord`]
///
/// Every save is one write transaction, and redb only publishes a
/// transaction once it is fully on disk. A crash mid-save leaves the previous
/// snapshot readable, and a reader never sees vectors and records from
/// different saves.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptSnapshot(message.into())
}

fn open_optional<K: redb::Key + 'static, V: redb::Value + 'static>(
    txn: &ReadTransaction,
    table: TableDefinition<K, V>,
) -> Result<Option<ReadOnlyTable<K, V>>> {
    match txn.open_table(table) {
        Ok(t) => Ok(Some(t)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn encode_vector(vector: &[f32]) -> &[u8] {
    bytemuck::cast_slice(vector)
}

fn decode_vector(bytes: &[u8]) -> Vector {
    bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}

/// Whether the row persisted at `position` matches the in-memory one.
fn shares_row(
    txn: &WriteTransaction,
    index: &VectorIndex,
    metadata: &MetadataStore,
    position: u64,
) -> Result<bool> {
    let (Some(vector), Ok(record)) = (
        index.vector(position as usize),
        metadata.get(position as usize),
    ) else {
        return Ok(false);
    };
    let vectors = txn.open_table(VECTORS)?;
    let records = txn.open_table(RECORDS)?;
    let same_vector = vectors
        .get(position)?
        .is_some_and(|stored| stored.value() == encode_vector(vector));
    let same_record = records
        .get(position)?
        .is_some_and(|stored| {
            serde_json::from_slice::<ChunkRecord>(stored.value())
                .is_ok_and(|stored| &stored == record)
        });
    Ok(same_vector && same_record)
}

impl Persistence for SnapshotFile {
    /// Positions already on disk are kept and only new ones are written. The
    /// snapshot is replaced wholesale when it holds more vectors than
    /// `index`, vectors of another dimension, or a last row that `index` and
    /// `metadata` do not share.
    fn save(
        &self,
        index: &VectorIndex,
        metadata: &MetadataStore,
    ) -> Result<()> {
        let count = index.count();
        if count != metadata.len() {
            return Err(corrupt(format!(
                "refusing to save {count} vectors with {} metadata records",
                metadata.len()
            )));
        }
        let dimension = index.dimension().unwrap_or(0) as u64;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&self.path)?;
        let txn = db.begin_write()?;

        let (stored_count, stored_dimension) = {
            let manifest = txn.open_table(MANIFEST)?;
            let count = manifest.get(COUNT_KEY)?.map_or(0, |v| v.value());
            let dim = manifest.get(DIMENSION_KEY)?.map_or(0, |v| v.value());
            (count, dim)
        };
        let rewrite = stored_count > count as u64
            || (stored_count > 0
                && (stored_dimension != dimension
                    || !shares_row(&txn, index, metadata, stored_count - 1)?));
        if rewrite {
            txn.delete_table(VECTORS)?;
            txn.delete_table(RECORDS)?;
        }
        let start = if rewrite { 0 } else { stored_count as usize };

        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut records = txn.open_table(RECORDS)?;
            for position in start..count {
                let Some(vector) = index.vector(position) else {
                    return Err(corrupt(format!(
                        "index has no vector at position {position}"
                    )));
                };
                let record = serde_json::to_vec(metadata.get(position)?)?;
                vectors.insert(position as u64, encode_vector(vector))?;
                records.insert(position as u64, record.as_slice())?;
            }

            let mut manifest = txn.open_table(MANIFEST)?;
            manifest.insert(VERSION_KEY, SNAPSHOT_VERSION)?;
            manifest.insert(COUNT_KEY, count as u64)?;
            manifest.insert(DIMENSION_KEY, dimension)?;
        }
        txn.commit()?;

        tracing::debug!(
            path = %self.path.display(),
            count,
            written = count - start,
            rewrite,
            "snapshot saved"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<(VectorIndex, MetadataStore)>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let db = Database::open(&self.path).map_err(|e| {
            corrupt(format!("cannot open {}: {e}", self.path.display()))
        })?;
        let txn = db.begin_read()?;

        let manifest = open_optional(&txn, MANIFEST)?;
        let vectors = open_optional(&txn, VECTORS)?;
        let records = open_optional(&txn, RECORDS)?;
        let (manifest, vectors, records) = match (manifest, vectors, records) {
            (None, None, None) => return Ok(None),
            (Some(m), Some(v), Some(r)) => (m, v, r),
            _ => return Err(corrupt("snapshot is missing one of its tables")),
        };

        let version = manifest.get(VERSION_KEY)?.map(|v| v.value());
        if version != Some(SNAPSHOT_VERSION) {
            return Err(corrupt(format!(
                "unsupported snapshot version {version:?}, \
                 expected {SNAPSHOT_VERSION}"
            )));
        }
        let count = manifest
            .get(COUNT_KEY)?
            .map(|v| v.value())
            .ok_or_else(|| corrupt("manifest has no count"))?
            as usize;
        let dimension = manifest.get(DIMENSION_KEY)?.map_or(0, |v| v.value());
        if count > 0 && dimension == 0 {
            return Err(corrupt("non-empty snapshot has zero dimension"));
        }
        let row_bytes = usize::try_from(dimension)
            .ok()
            .and_then(|d| d.checked_mul(size_of::<f32>()))
            .ok_or_else(|| {
                corrupt(format!("dimension {dimension} is too large"))
            })?;

        let mut loaded_vectors: Vec<Vector> =
            Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
        for entry in vectors.iter()? {
            let (key, value) = entry?;
            let position = loaded_vectors.len() as u64;
            if key.value() != position {
                return Err(corrupt(format!(
                    "vector positions are not contiguous at {position}"
                )));
            }
            let bytes = value.value();
            if bytes.len() != row_bytes {
                return Err(corrupt(format!(
                    "vector {position} holds {} bytes, expected {row_bytes}",
                    bytes.len()
                )));
            }
            loaded_vectors.push(decode_vector(bytes));
        }

        let mut loaded_records: Vec<ChunkRecord> =
            Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
        for entry in records.iter()? {
            let (key, value) = entry?;
            let position = loaded_records.len() as u64;
            if key.value() != position {
                return Err(corrupt(format!(
                    "record positions are not contiguous at {position}"
                )));
            }
            let record = serde_json::from_slice(value.value()).map_err(|e| {
                corrupt(format!("record {position} is unreadable: {e}"))
            })?;
            loaded_records.push(record);
        }

        if loaded_vectors.len() != count || loaded_records.len() != count {
            return Err(corrupt(format!(
                "manifest lists {count} entries but found {} vectors \
                 and {} records",
                loaded_vectors.len(),
                loaded_records.len()
            )));
        }

        let index =
            VectorIndex::from_vectors(IndexKind::Exact, &loaded_vectors)?;
        tracing::debug!(
            path = %self.path.display(),
            count,
            dimension,
            "snapshot loaded"
        );
        Ok(Some((index, MetadataStore::from_records(loaded_records))))
    }

    fn clear_storage(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
