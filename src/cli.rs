use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::config_db::EmbedderKind;

#[derive(Debug, Parser)]
#[command(
    name = "ragnova",
    about = "Chunk, embed and search your documents from a local vector store"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding backend (colbert or hash)
    #[arg(long, global = true, value_parser = parse_embedder)]
    pub embedder: Option<EmbedderKind>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

fn parse_embedder(s: &str) -> Result<EmbedderKind, String> {
    s.parse().map_err(|e: crate::error::Error| e.to_string())
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk, embed and store documents
    Ingest(IngestArgs),
    /// Find the chunks nearest to a query
    Query(QueryArgs),
    /// Remove every stored chunk
    Clear,
    /// Show store status and statistics
    Status(StatusArgs),
    /// Manage persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files or directories to ingest; `-` reads standard input
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Source name recorded for the chunks (required for stdin)
    #[arg(long)]
    pub source: Option<String>,

    /// Only ingest files whose relative path matches this glob
    #[arg(long)]
    pub glob: Option<String>,

    /// Ingest even if the source is already stored
    #[arg(long)]
    pub force: bool,

    /// Chunk size in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Overlap between adjacent chunks in characters
    #[arg(long)]
    pub overlap: Option<usize>,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The query text
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "3")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Return at most one chunk per source
    #[arg(long)]
    pub distinct: bool,

    /// Drop results farther than this squared distance
    #[arg(long)]
    pub max_distance: Option<f32>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Store a setting
    Set { key: String, value: String },
    /// Print a stored setting
    Get { key: String },
    /// Remove a stored setting (revert to default)
    Unset { key: String },
    /// List stored settings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "ragnova",
            &mut std::io::stdout(),
        );
    }
}
