use std::path::Path;

use clap::Parser;
use ragnova::{
    ConfigDb,
    DataDir,
    Error,
    HashEmbedder,
    ModelManager,
    Result,
    SnapshotFile,
    VectorStore,
    cli::{Cli, Command, ConfigAction, IngestArgs, QueryArgs},
    config_db::{EmbedderKind, SettingOverrides, Settings, validate_setting},
    embedding::Embedder,
    ingestion::{self, IngestReport},
    search,
    snapshot::Persistence,
    store::{IngestOptions, StoreOptions},
    walker,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RAGNOVA_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let mut overrides = SettingOverrides {
        model: cli.model.clone(),
        embedder: cli.embedder,
        ..Default::default()
    };

    match &cli.command {
        Command::Ingest(args) => {
            overrides.chunk_size = args.chunk_size;
            overrides.overlap = args.overlap;
            let settings = Settings::resolve(&config_db, &overrides)?;
            let store =
                open_store(&data_dir, &settings, settings.store_options())?;
            cmd_ingest(&store, args)?;
        }
        Command::Query(args) => {
            let settings = Settings::resolve(&config_db, &overrides)?;
            let store =
                open_store(&data_dir, &settings, settings.read_options())?;
            cmd_query(&store, args)?;
        }
        Command::Clear => {
            // No store is opened so a corrupt snapshot can still be cleared.
            SnapshotFile::new(data_dir.snapshot_path()).clear_storage()?;
            println!("Cleared vector store at {}", data_dir.root().display());
        }
        Command::Status(args) => {
            let settings = Settings::resolve(&config_db, &overrides)?;
            let store =
                open_store(&data_dir, &settings, settings.read_options())?;
            cmd_status(&store, &data_dir, args.json)?;
        }
        Command::Config { action } => cmd_config(&config_db, action)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn build_embedder(settings: &Settings) -> Box<dyn Embedder> {
    match settings.embedder {
        EmbedderKind::Colbert => {
            Box::new(ModelManager::with_model_id(settings.model.clone()))
        }
        EmbedderKind::Hash => Box::new(HashEmbedder::default()),
    }
}

fn open_store(
    data_dir: &DataDir,
    settings: &Settings,
    options: StoreOptions,
) -> Result<VectorStore> {
    let embedder = build_embedder(settings);
    let persistence = Box::new(SnapshotFile::new(data_dir.snapshot_path()));
    VectorStore::open(embedder, persistence, options).map_err(
        |e| match e {
            Error::CorruptSnapshot(msg) => Error::CorruptSnapshot(format!(
                "{msg} (run `ragnova clear` to start over)"
            )),
            other => other,
        },
    )
}

fn cmd_ingest(store: &VectorStore, args: &IngestArgs) -> Result<()> {
    let options = IngestOptions { force: args.force };

    if args.source.is_some() && args.paths.len() > 1 {
        return Err(Error::Config(
            "--source can only be used with a single path".into(),
        ));
    }

    let mut report = IngestReport::default();
    let filter = walker::compile_filter(args.glob.as_deref())?;
    for path in &args.paths {
        if path == Path::new("-") {
            let source = args.source.as_deref().ok_or_else(|| {
                Error::Config("reading stdin requires --source".into())
            })?;
            let outcome = ingestion::ingest_reader(
                store,
                std::io::stdin().lock(),
                source,
                options,
            )?;
            report.merge_outcome(&outcome);
        } else if let (Some(source), true) = (&args.source, path.is_file()) {
            let file = std::fs::File::open(path)?;
            let outcome =
                ingestion::ingest_reader(store, file, source, options)?;
            report.merge_outcome(&outcome);
        } else if args.source.is_some() {
            return Err(Error::Config(
                "--source can only name a single file or stdin".into(),
            ));
        } else {
            let files = walker::discover(path, filter.as_ref())?;
            if files.is_empty() {
                eprintln!("No .md or .txt files found in {}", path.display());
                continue;
            }
            report.merge(ingestion::ingest_files(store, &files, options)?);
        }
    }

    println!(
        "Ingested {} document(s), {} chunk(s); {} total chunk(s) stored",
        report.documents,
        report.chunks,
        store.count()
    );
    if report.skipped > 0 {
        println!(
            "Skipped {} already ingested source(s); \
             use --force to add them again",
            report.skipped
        );
    }
    if report.empty > 0 {
        println!("Skipped {} empty document(s)", report.empty);
    }
    for source in &report.unreadable {
        eprintln!("Warning: could not read {source}");
    }
    Ok(())
}

fn cmd_query(store: &VectorStore, args: &QueryArgs) -> Result<()> {
    let hits = search::execute_query(args, store)?;
    let mut out = std::io::stdout().lock();
    if args.json {
        search::format_json(&mut out, &hits, &args.query)
    } else {
        search::format_human(&mut out, &hits)
    }
}

fn cmd_status(
    store: &VectorStore,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let status = store.status();

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root(),
            "snapshot": data_dir.snapshot_path(),
            "status": status,
        });
        println!("{value}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Embedder: {}", status.embedder);
        println!("Index: {}", status.index);
        match status.dimension {
            Some(dim) => println!("Dimension: {dim}"),
            None => println!("Dimension: (empty)"),
        }
        println!("Chunks: {}", status.chunks);
        println!("Sources: {}", status.sources.len());
        for source in &status.sources {
            println!("  {source}");
        }
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            validate_setting(config_db, key, value)?;
            config_db.set_setting(key, value)?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Get { key } => match config_db.get_setting(key)? {
            Some(value) => println!("{value}"),
            None => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
        },
        ConfigAction::Unset { key } => {
            if !config_db.remove_setting(key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
            println!("Unset {key}");
        }
        ConfigAction::List { json } => {
            let settings = config_db.list_settings()?;
            if *json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::Value::Object(map));
            } else if settings.is_empty() {
                println!("No settings stored.");
            } else {
                for (key, value) in &settings {
                    println!("{key}\t{value}");
                }
            }
        }
    }
    Ok(())
}
