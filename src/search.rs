use std::io::Write;

use serde::Serialize;

use crate::{
    cli::QueryArgs,
    error::Result,
    store::{QueryHit, SearchParams, VectorStore},
    text_util,
};

impl From<&QueryArgs> for SearchParams {
    fn from(args: &QueryArgs) -> Self {
        Self {
            query: args.query.clone(),
            count: args.count,
            distinct_sources: args.distinct,
            max_distance: args.max_distance,
        }
    }
}

/// Run a query from the command line against `store`.
pub fn execute_query(
    args: &QueryArgs,
    store: &VectorStore,
) -> Result<Vec<QueryHit>> {
    store.search(&SearchParams::from(args))
}

/// Write results for human-readable terminal output.
pub fn format_human(out: &mut impl Write, hits: &[QueryHit]) -> Result<()> {
    if hits.is_empty() {
        writeln!(out, "No results found.")?;
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        writeln!(
            out,
            "{:>3}. [{:.4}] {} @{}",
            rank + 1,
            hit.distance,
            hit.source,
            hit.offset
        )?;
        writeln!(out, "     {}", text_util::snippet(&hit.text))?;
    }
    writeln!(out, "\n{} result(s)", hits.len())?;
    Ok(())
}

#[derive(Serialize)]
struct JsonHit<'a> {
    rank: usize,
    #[serde(flatten)]
    hit: &'a QueryHit,
}

#[derive(Serialize)]
struct JsonResults<'a> {
    query: &'a str,
    result_count: usize,
    results: Vec<JsonHit<'a>>,
}

/// Write results as a single JSON document.
pub fn format_json(
    out: &mut impl Write,
    hits: &[QueryHit],
    query: &str,
) -> Result<()> {
    let doc = JsonResults {
        query,
        result_count: hits.len(),
        results: hits
            .iter()
            .enumerate()
            .map(|(i, hit)| JsonHit { rank: i + 1, hit })
            .collect(),
    };
    serde_json::to_writer(&mut *out, &doc)?;
    writeln!(out)?;
    Ok(())
}
