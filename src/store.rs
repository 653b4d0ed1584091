//! The chunked vector store.
//!
//! [`VectorStore`] owns one [`VectorIndex`] and one [`MetadataStore`] and is
//! the only place either is mutated, so vector `i` and record `i` always
//! describe the same chunk. Writers (ingest, clear) are serialized by a
//! writer lock. Index and metadata sit together behind a single
//! reader-writer lock that writers only take for the commit step, so queries
//! see all of a batch or none of it.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use crate::{
    chunking::ChunkingConfig,
    embedding::Embedder,
    error::{Error, Result},
    metadata::{ChunkRecord, MetadataStore},
    snapshot::Persistence,
    vector_index::{IndexKind, VectorIndex},
};

/// Construction-time settings for a [`VectorStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub chunking: ChunkingConfig,
    pub index_kind: IndexKind,
}

impl StoreOptions {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.index_kind.validate()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Ingest even if chunks from this source are already stored.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Chunks were embedded and committed at
    /// `first_position..first_position + chunks`.
    Added { chunks: usize, first_position: usize },
    /// The text held nothing but whitespace.
    Empty,
    /// The source was already ingested and `force` was not set.
    SkippedDuplicate,
}

impl IngestOutcome {
    pub fn chunks_added(&self) -> usize {
        match self {
            Self::Added { chunks, .. } => *chunks,
            Self::Empty | Self::SkippedDuplicate => 0,
        }
    }
}

/// Query parameters for [`VectorStore::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub query: String,
    /// Maximum number of hits to return.
    pub count: usize,
    /// Keep only the best hit per source.
    pub distinct_sources: bool,
    /// Drop hits farther than this squared distance.
    pub max_distance: Option<f32>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>, count: usize) -> Self {
        Self {
            query: query.into(),
            count,
            distinct_sources: false,
            max_distance: None,
        }
    }
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QueryHit {
    pub position: usize,
    pub text: String,
    pub source: String,
    pub offset: usize,
    pub distance: f32,
}

/// Summary of the committed state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoreStatus {
    pub chunks: usize,
    pub dimension: Option<usize>,
    pub revision: u64,
    pub index: String,
    pub embedder: String,
    pub persistent: bool,
    pub sources: Vec<String>,
}

#[derive(Debug)]
struct IndexState {
    index: VectorIndex,
    metadata: MetadataStore,
    /// Incremented on every commit and clear.
    revision: u64,
}

impl IndexState {
    fn empty(kind: IndexKind) -> Self {
        Self {
            index: VectorIndex::new(kind),
            metadata: MetadataStore::new(),
            revision: 0,
        }
    }

    fn check_aligned(&self) -> Result<()> {
        if self.index.count() != self.metadata.len() {
            tracing::error!(
                vectors = self.index.count(),
                records = self.metadata.len(),
                "vector index and metadata are misaligned"
            );
            return Err(Error::CorruptSnapshot(format!(
                "{} vectors but {} metadata records",
                self.index.count(),
                self.metadata.len()
            )));
        }
        Ok(())
    }
}

pub struct VectorStore {
    embedder: Box<dyn Embedder>,
    persistence: Option<Box<dyn Persistence>>,
    options: StoreOptions,
    state: RwLock<IndexState>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("embedder", &self.embedder.name())
            .field("persistent", &self.persistence.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl VectorStore {
    /// Create a store that lives only in memory.
    pub fn in_memory(
        embedder: Box<dyn Embedder>,
        options: StoreOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            embedder,
            persistence: None,
            options,
            state: RwLock::new(IndexState::empty(options.index_kind)),
            writer: Mutex::new(()),
        })
    }

    /// Open a persistent store, loading the last snapshot if one exists.
    ///
    /// A corrupt snapshot is returned as [`Error::CorruptSnapshot`]; callers
    /// decide whether to clear it and start over.
    pub fn open(
        embedder: Box<dyn Embedder>,
        persistence: Box<dyn Persistence>,
        options: StoreOptions,
    ) -> Result<Self> {
        options.validate()?;
        let state = match persistence.load()? {
            Some((index, metadata)) => {
                let state = IndexState {
                    index: index.into_kind(options.index_kind),
                    metadata,
                    revision: 0,
                };
                state.check_aligned()?;
                tracing::info!(
                    chunks = state.index.count(),
                    dimension = ?state.index.dimension(),
                    "loaded existing vector store"
                );
                state
            }
            None => {
                tracing::info!("no existing snapshot, starting fresh");
                IndexState::empty(options.index_kind)
            }
        };

        Ok(Self {
            embedder,
            persistence: Some(persistence),
            options,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    /// Number of committed chunks.
    pub fn count(&self) -> usize {
        self.state.read().index.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Distinct sources in ingestion order.
    pub fn sources(&self) -> Vec<String> {
        self.state
            .read()
            .metadata
            .sources()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// A copy of the record stored at `position`.
    pub fn record(&self, position: usize) -> Result<ChunkRecord> {
        self.state.read().metadata.get(position).cloned()
    }

    pub fn status(&self) -> StoreStatus {
        let state = self.state.read();
        StoreStatus {
            chunks: state.index.count(),
            dimension: state.index.dimension(),
            revision: state.revision,
            index: state.index.kind().to_string(),
            embedder: self.embedder.name().to_string(),
            persistent: self.persistence.is_some(),
            sources: state
                .metadata
                .sources()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Chunk, embed and commit `text` from `source`, skipping sources that
    /// are already stored.
    pub fn ingest(&self, text: &str, source: &str) -> Result<IngestOutcome> {
        self.ingest_with(text, source, IngestOptions::default())
    }

    /// Chunk, embed and commit `text` from `source` as one unit.
    ///
    /// On any failure the in-memory state and the persisted snapshot are
    /// exactly what they were before the call.
    pub fn ingest_with(
        &self,
        text: &str,
        source: &str,
        options: IngestOptions,
    ) -> Result<IngestOutcome> {
        let _writer = self.writer.lock();

        if text.trim().is_empty() {
            tracing::warn!(source, "no text to ingest");
            return Ok(IngestOutcome::Empty);
        }
        if !options.force && self.state.read().metadata.contains_source(source)
        {
            tracing::warn!(source, "skipping duplicate source");
            return Ok(IngestOutcome::SkippedDuplicate);
        }

        let chunks = self.options.chunking.chunk(source, text)?;
        let texts: Vec<String> =
            chunks.iter().map(|c| c.text.clone()).collect();
        tracing::debug!(source, chunks = texts.len(), "embedding chunks");
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "{} returned {} vectors for {} chunks",
                self.embedder.name(),
                vectors.len(),
                chunks.len()
            )));
        }

        let ingested_at = unix_now();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .map(|chunk| ChunkRecord::from_chunk(chunk, ingested_at))
            .collect();

        let mut state = self.state.write();
        let first_position = self.commit(&mut state, &vectors, records)?;
        tracing::info!(
            source,
            chunks = vectors.len(),
            total = state.index.count(),
            revision = state.revision,
            "ingested document"
        );
        Ok(IngestOutcome::Added {
            chunks: vectors.len(),
            first_position,
        })
    }

    /// Append vectors and records together and persist them, rolling both
    /// back if any step fails.
    fn commit(
        &self,
        state: &mut IndexState,
        vectors: &[Vec<f32>],
        records: Vec<ChunkRecord>,
    ) -> Result<usize> {
        state.check_aligned()?;
        let before = state.index.count();

        let positions = state.index.add_batch(vectors)?;
        let record_positions = state.metadata.append_batch(records);
        if positions != record_positions {
            state.index.truncate(before);
            state.metadata.truncate(before);
            return Err(Error::CorruptSnapshot(
                "vector and record positions diverged during commit"
                    .to_string(),
            ));
        }

        if let Some(persistence) = &self.persistence
            && let Err(e) = persistence.save(&state.index, &state.metadata)
        {
            tracing::warn!(
                error = %e,
                "persisting snapshot failed, rolling back"
            );
            state.index.truncate(before);
            state.metadata.truncate(before);
            return Err(e);
        }

        state.revision += 1;
        Ok(before)
    }

    /// Return the `k` chunks nearest to `text`, closest first.
    ///
    /// An empty store yields no results without invoking the embedder.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>> {
        self.search(&SearchParams::new(text, k))
    }

    pub fn search(&self, params: &SearchParams) -> Result<Vec<QueryHit>> {
        if params.count == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(&params.query)?;

        let state = self.state.read();
        let count = state.index.count();
        // Distinct-source filtering may discard hits, so rank everything.
        let k = if params.distinct_sources {
            count
        } else {
            params.count
        };
        let neighbours = state.index.search(&query_vector, k)?;

        let mut seen = std::collections::HashSet::new();
        let mut hits = Vec::with_capacity(params.count.min(neighbours.len()));
        for (position, distance) in neighbours {
            if params.max_distance.is_some_and(|max| distance > max) {
                break;
            }
            let record = state.metadata.get(position)?;
            if params.distinct_sources && !seen.insert(record.source.as_str()) {
                continue;
            }
            hits.push(QueryHit {
                position,
                text: record.text.clone(),
                source: record.source.clone(),
                offset: record.offset,
                distance,
            });
            if hits.len() == params.count {
                break;
            }
        }

        tracing::debug!(
            query = %params.query,
            hits = hits.len(),
            revision = state.revision,
            "query complete"
        );
        Ok(hits)
    }

    /// Persist the current state. A no-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let _writer = self.writer.lock();
        let state = self.state.read();
        state.check_aligned()?;
        if let Some(persistence) = &self.persistence {
            persistence.save(&state.index, &state.metadata)?;
        }
        Ok(())
    }

    /// Remove every chunk from memory and from storage.
    pub fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock();
        if let Some(persistence) = &self.persistence {
            persistence.clear_storage()?;
        }
        let mut state = self.state.write();
        state.index.clear();
        state.metadata.clear();
        state.revision += 1;
        tracing::info!("vector store cleared");
        Ok(())
    }
}
