//! ragnova - a chunked, persistent vector store for retrieval.
//!
//! Documents are split into overlapping character windows, embedded into
//! fixed-dimension vectors and kept in a nearest-neighbor index whose
//! positions line up one-to-one with stored chunk metadata. The index and
//! metadata are committed together to a [redb](https://github.com/cberner/redb)
//! snapshot so a restart picks up exactly where the last ingest left off.
//!
//! # Quick start
//!
//! ```no_run
//! use ragnova::{HashEmbedder, SnapshotFile, VectorStore};
//! use ragnova::store::StoreOptions;
//!
//! let store = VectorStore::open(
//!     Box::new(HashEmbedder::default()),
//!     Box::new(SnapshotFile::new("/tmp/ragnova/snapshot.redb")),
//!     StoreOptions::default(),
//! )
//! .unwrap();
//!
//! store.ingest("The cat sat. The dog ran.", "pets.txt").unwrap();
//! for hit in store.query("cat", 3).unwrap() {
//!     println!("{}@{} ({:.3}): {}", hit.source, hit.offset, hit.distance,
//!         hit.text);
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod ingestion;
pub mod metadata;
pub mod model_manager;
pub mod search;
pub mod snapshot;
pub mod store;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use chunking::{Chunk, ChunkingConfig, chunk_text};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use embedding::{Embedder, HashEmbedder};
pub use error::{Error, Result};
pub use metadata::{ChunkRecord, MetadataStore};
pub use model_manager::ModelManager;
pub use snapshot::{Persistence, SnapshotFile};
pub use store::{QueryHit, VectorStore};
pub use vector_index::{IndexKind, VectorIndex};
