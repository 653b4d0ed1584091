use std::io::{IsTerminal, Read};

use kdam::{BarExt, tqdm};
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    store::{IngestOptions, IngestOutcome, VectorStore},
    walker::DiscoveredFile,
};

/// Totals from ingesting a batch of files.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: usize,
    pub empty: usize,
    /// Files that could not be read as UTF-8 text.
    pub unreadable: Vec<String>,
}

impl IngestReport {
    pub fn merge_outcome(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Added { chunks, .. } => {
                self.documents += 1;
                self.chunks += chunks;
            }
            IngestOutcome::SkippedDuplicate => self.skipped += 1,
            IngestOutcome::Empty => self.empty += 1,
        }
    }

    pub fn merge(&mut self, other: IngestReport) {
        self.documents += other.documents;
        self.chunks += other.chunks;
        self.skipped += other.skipped;
        self.empty += other.empty;
        self.unreadable.extend(other.unreadable);
    }
}

/// Ingest discovered files into `store`, one document per file.
///
/// Files are read in parallel and committed sequentially in discovery order.
/// Unreadable files are reported and skipped; any store error stops the
/// batch, leaving earlier documents committed.
pub fn ingest_files(
    store: &VectorStore,
    files: &[DiscoveredFile],
    options: IngestOptions,
) -> Result<IngestReport> {
    let loaded: Vec<_> = files
        .par_iter()
        .map(|file| {
            let content = std::fs::read_to_string(&file.absolute_path);
            (file.source_name(), content)
        })
        .collect();

    let mut report = IngestReport::default();
    let mut bar = std::io::stderr()
        .is_terminal()
        .then(|| {
            tqdm!(total = loaded.len(), desc = "Ingesting", unit = " files")
        });

    for (source, content) in loaded {
        match content {
            Ok(text) => {
                let outcome = store.ingest_with(&text, &source, options)?;
                report.merge_outcome(&outcome);
            }
            Err(e) => {
                tracing::warn!(
                    source = %source,
                    error = %e,
                    "skipping unreadable file"
                );
                report.unreadable.push(source);
            }
        }
        if let Some(bar) = bar.as_mut() {
            bar.update(1)?;
        }
    }
    if let Some(bar) = bar.as_mut() {
        bar.refresh()?;
        eprintln!();
    }

    Ok(report)
}

/// Ingest everything readable from `reader` as one document named `source`.
pub fn ingest_reader(
    store: &VectorStore,
    mut reader: impl Read,
    source: &str,
    options: IngestOptions,
) -> Result<IngestOutcome> {
    if source.trim().is_empty() {
        return Err(Error::Config("source name must not be empty".into()));
    }
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    store.ingest_with(&text, source, options)
}
