use ragnova::{
    ChunkingConfig,
    Embedder,
    Error,
    HashEmbedder,
    IndexKind,
    Persistence,
    Result,
    SnapshotFile,
    VectorStore,
    embedding::Vector,
    store::{IngestOutcome, SearchParams, StoreOptions},
};

/// Counts letters a-e; chunks sharing letters land close together.
struct LetterEmbedder;

impl Embedder for LetterEmbedder {
    fn name(&self) -> &str {
        "letters"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 5];
                for c in text.chars() {
                    if let Some(slot) = "abcde".find(c) {
                        v[slot] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

fn options(
    chunk_size: usize,
    overlap: usize,
    index_kind: IndexKind,
) -> StoreOptions {
    StoreOptions {
        chunking: ChunkingConfig {
            chunk_size,
            overlap,
        },
        index_kind,
    }
}

fn open(path: &std::path::Path, opts: StoreOptions) -> VectorStore {
    VectorStore::open(
        Box::new(HashEmbedder::default()),
        Box::new(SnapshotFile::new(path)),
        opts,
    )
    .unwrap()
}

#[test]
fn store_survives_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("snapshot.redb");
    let opts = options(30, 10, IndexKind::Exact);

    let texts = [
        ("rivers.md", "Rivers carve valleys over thousands of years."),
        ("peaks.md", "Mountain peaks collect snow through the winter."),
        ("tides.md", "Tides follow the moon around the planet."),
    ];

    let mut expected_count = 0;
    for (source, text) in texts {
        let store = open(&path, opts);
        assert_eq!(store.count(), expected_count);
        expected_count += store.ingest(text, source).unwrap().chunks_added();
    }

    let store = open(&path, opts);
    assert_eq!(store.count(), expected_count);
    assert_eq!(store.sources(), vec!["rivers.md", "peaks.md", "tides.md"]);

    let hits = store.query("Tides follow the moon", 1).unwrap();
    assert_eq!(hits[0].source, "tides.md");
    assert_eq!(hits[0].offset, 0);
}

#[test]
fn offsets_and_texts_match_source_documents() {
    let store = VectorStore::in_memory(
        Box::new(LetterEmbedder),
        options(8, 3, IndexKind::Exact),
    )
    .unwrap();
    let text = "aaaa bbbb cccc dddd eeee";
    store.ingest(text, "letters.txt").unwrap();

    let chars: Vec<char> = text.chars().collect();
    for position in 0..store.count() {
        let record = store.record(position).unwrap();
        let end = (record.offset + 8).min(chars.len());
        let expected: String = chars[record.offset..end].iter().collect();
        assert_eq!(record.text, expected);
    }

    let hits = store.query("eeee", 1).unwrap();
    assert!(hits[0].text.contains("eeee"));
}

#[test]
fn approximate_index_reloads_and_searches() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("snapshot.redb");
    let opts = options(
        10,
        0,
        IndexKind::Approximate {
            lists: 4,
            probes: 4,
        },
    );

    {
        let store = open(&path, opts);
        for i in 0..40 {
            store
                .ingest(&format!("document number {i}"), &format!("doc{i}"))
                .unwrap();
        }
    }

    let store = open(&path, opts);
    assert!(store.status().index.starts_with("approximate"));
    let hits = store.query("document number 7", 5).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn reopening_with_a_different_embedder_is_refused_on_ingest() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("snapshot.redb");
    let opts = options(50, 10, IndexKind::Exact);
    open(&path, opts).ingest("hash embedded text", "a").unwrap();

    let store = VectorStore::open(
        Box::new(LetterEmbedder),
        Box::new(SnapshotFile::new(&path)),
        opts,
    )
    .unwrap();
    let err = store.ingest("abcde", "b").unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { actual: 5, .. }));

    let reloaded = SnapshotFile::new(&path).load().unwrap().unwrap();
    assert_eq!(reloaded.1.len(), 1);
}

#[test]
fn search_params_combine_filters() {
    let store = VectorStore::in_memory(
        Box::new(LetterEmbedder),
        options(4, 0, IndexKind::Exact),
    )
    .unwrap();
    assert_eq!(
        store.ingest("aaaaaaaa", "a.txt").unwrap(),
        IngestOutcome::Added {
            chunks: 2,
            first_position: 0
        }
    );
    store.ingest("bbbb", "b.txt").unwrap();

    let params = SearchParams {
        query: "aaaa".into(),
        count: 10,
        distinct_sources: true,
        max_distance: Some(1.0),
    };
    let hits = store.search(&params).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "a.txt");
    assert_eq!(hits[0].distance, 0.0);
}
