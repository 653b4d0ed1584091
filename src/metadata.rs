use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// Metadata describing the vector at the same position in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub source: String,
    pub text: String,
    /// Char offset of the chunk within its source document.
    pub offset: usize,
    /// Seconds since the Unix epoch when the chunk was ingested.
    #[serde(default)]
    pub ingested_at: u64,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: Chunk, ingested_at: u64) -> Self {
        Self {
            source: chunk.source,
            text: chunk.text,
            offset: chunk.offset,
            ingested_at,
        }
    }
}

/// Ordered chunk records, aligned 1:1 with vector positions.
///
/// Append and clear are the only mutations; records are never edited in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    records: Vec<ChunkRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ChunkRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, record: ChunkRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn append_batch(&mut self, records: Vec<ChunkRecord>) -> Vec<usize> {
        let start = self.records.len();
        self.records.extend(records);
        (start..self.records.len()).collect()
    }

    /// Look up the record at `position`.
    ///
    /// A miss means metadata drifted out of step with the vector index, so it
    /// is logged as an invariant violation.
    pub fn get(&self, position: usize) -> Result<&ChunkRecord> {
        self.records.get(position).ok_or_else(|| {
            tracing::error!(
                position,
                count = self.records.len(),
                "metadata record missing for vector position"
            );
            Error::RecordNotFound {
                position,
                count: self.records.len(),
            }
        })
    }

    pub fn get_batch(&self, positions: &[usize]) -> Result<Vec<&ChunkRecord>> {
        positions.iter().map(|&p| self.get(p)).collect()
    }

    /// Distinct sources in the order they were first ingested.
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.records.iter().any(|r| r.source == source)
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
