//! CLI entry point for quire: build an index from documents and ask questions against it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use quire_core::{
    app_data_dir, load_config, load_config_from, read_document, scan_documents, status, Config,
    Error, ErrorKind, ErrorReport, IndexLocation, IngestReport, Pipeline, RawDocument,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "quire: ask questions answered from your own documents")]
struct Cli {
    /// Config file to use instead of the one in the app data directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show core status and the active configuration.
    Status,
    /// Show where quire stores its config and default index (app data directory).
    DataDir,
    /// Scan a directory for documents and list the ones an ingest would read.
    Scan {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Build a new index from documents, replacing any index at the location.
    Ingest {
        /// Files, or directories to scan for documents.
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        index: IndexArgs,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the saved index.
    Ask {
        question: String,
        #[command(flatten)]
        index: IndexArgs,
        /// Load the index even though it was not written in this session.
        #[arg(long)]
        trust_index: bool,
        /// Number of passages handed to the model.
        #[arg(short)]
        k: Option<usize>,
        /// Print the answer or failure as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the index from a directory whenever its documents change.
    Watch {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[command(flatten)]
        index: IndexArgs,
        /// Quiet period before a rebuild, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        debounce_ms: u64,
    },
}

#[derive(clap::Args)]
struct IndexArgs {
    /// Index directory. Defaults to the configured location.
    #[arg(long, value_name = "DIR")]
    index: Option<PathBuf>,
}

#[derive(Serialize)]
struct AskOutput<'a> {
    answer: &'a str,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => match load_config_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => load_config(),
    };

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => show_status(&config),
        Commands::DataDir => match app_data_dir() {
            Some(p) => {
                println!("{}", p.display());
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("Could not determine app data directory.");
                ExitCode::FAILURE
            }
        },
        Commands::Scan { path } => match scan_documents(&path) {
            Ok(paths) => {
                println!("Found {} document(s) under {}", paths.len(), path.display());
                for p in paths {
                    let size = std::fs::metadata(&p).map(|m| m.len()).unwrap_or(0);
                    println!("  {}  ({size} bytes)", p.display());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Ingest {
            paths,
            index,
            chunk_size,
            overlap,
            json,
        } => {
            let mut config = config;
            if let Some(size) = chunk_size {
                config.chunking.chunk_size = size;
            }
            if let Some(overlap) = overlap {
                config.chunking.overlap = overlap;
            }
            match ingest(&config, &paths, index.index).await {
                Ok(report) => {
                    if json {
                        print_json(&report);
                    } else {
                        println!(
                            "Indexed {} document(s) as {} passage(s) of dimension {} at {}",
                            report.documents,
                            report.passages,
                            report.dimension,
                            report.location.display()
                        );
                    }
                    ExitCode::SUCCESS
                }
                Err(report) => fail(&report, json),
            }
        }
        Commands::Ask {
            question,
            index,
            trust_index,
            k,
            json,
        } => {
            let mut config = config;
            if let Some(k) = k {
                config.retrieval.top_k = k;
            }
            match ask(&config, &question, index.index, trust_index).await {
                Ok(answer) => {
                    if json {
                        print_json(&AskOutput { answer: &answer });
                    } else {
                        println!("{answer}");
                    }
                    ExitCode::SUCCESS
                }
                Err(report) => {
                    if !json && report.error_kind == ErrorKind::DeserializationTrust.as_str() {
                        eprintln!("Pass --trust-index if you built this index yourself.");
                    }
                    fail(&report, json)
                }
            }
        }
        Commands::Watch {
            path,
            index,
            debounce_ms,
        } => match watch(&config, path, index.index, Duration::from_millis(debounce_ms)).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(message) => {
                eprintln!("Error: {message}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("quire=debug,quire_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn show_status(config: &Config) -> ExitCode {
    println!("quire");
    println!("  core: {}", status());
    println!(
        "  embedding: {:?} {}",
        config.embedding.provider,
        config.embedding.model()
    );
    println!(
        "  generation: {:?} {}",
        config.generation.provider,
        config.generation.model()
    );
    match config.index_location() {
        Ok(p) => println!("  index: {}", p.display()),
        Err(e) => println!("  index: {e}"),
    }
    ExitCode::SUCCESS
}

fn index_location(config: &Config, index: Option<PathBuf>) -> Result<IndexLocation, ErrorReport> {
    let path = match index {
        Some(path) => path,
        None => config
            .index_location()
            .map_err(|e| Error::from(e).report())?,
    };
    Ok(IndexLocation::new(path))
}

/// Files are read as given; directories contribute every supported document under them.
fn collect_documents(paths: &[PathBuf]) -> Result<Vec<RawDocument>, Error> {
    let mut documents = Vec::new();
    for path in paths {
        if path.is_dir() {
            for p in scan_documents(path)? {
                documents.push(read_document(&p)?);
            }
        } else {
            documents.push(read_document(path)?);
        }
    }
    Ok(documents)
}

async fn ingest(
    config: &Config,
    paths: &[PathBuf],
    index: Option<PathBuf>,
) -> Result<IngestReport, ErrorReport> {
    let location = index_location(config, index)?;
    let pipeline = Pipeline::from_config(config).map_err(|e| e.report())?;
    let documents = collect_documents(paths).map_err(|e| e.report())?;
    pipeline
        .ingest(documents, &location)
        .await
        .map_err(|e| e.report())
}

async fn ask(
    config: &Config,
    question: &str,
    index: Option<PathBuf>,
    trust_index: bool,
) -> Result<String, ErrorReport> {
    let mut location = index_location(config, index)?;
    if trust_index {
        location = location.trusted();
    }
    let pipeline = Pipeline::from_config(config).map_err(|e| e.report())?;
    let answer = pipeline
        .query(question, &location)
        .await
        .map_err(|e| e.report())?;
    Ok(answer.text)
}

/// Ingest once, then again after every debounced change. Runs until interrupted.
async fn watch(
    config: &Config,
    root: PathBuf,
    index: Option<PathBuf>,
    debounce: Duration,
) -> Result<(), String> {
    let location = index_location(config, index).map_err(|r| r.message)?;
    let pipeline = Pipeline::from_config(config).map_err(|e| e.to_string())?;

    rebuild(&pipeline, &location, &root).await;
    println!(
        "Watching {} (index at {}). Ctrl+C to stop.",
        root.display(),
        location.path().display()
    );

    let handle = tokio::runtime::Handle::current();
    let watch_root = root.clone();
    let ignore = vec![location.path().to_path_buf()];
    tokio::task::spawn_blocking(move || {
        quire_core::watch_documents(&watch_root, debounce, &ignore, move |scanned| {
            if let Err(e) = scanned {
                warn!(error = %e, "rescan failed");
                return;
            }
            handle.block_on(rebuild(&pipeline, &location, &root));
        })
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())
}

async fn rebuild(pipeline: &Pipeline, location: &IndexLocation, root: &Path) {
    let documents = match collect_documents(&[root.to_path_buf()]) {
        Ok(documents) => documents,
        Err(e) => {
            eprintln!("Rebuild skipped: {e}");
            return;
        }
    };
    match pipeline.ingest(documents, location).await {
        Ok(report) => {
            info!(passages = report.passages, "index rebuilt");
            println!(
                "Indexed {} document(s) as {} passage(s)",
                report.documents, report.passages
            );
        }
        Err(e) => eprintln!("Rebuild failed: {e}"),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Error: {e}"),
    }
}

/// Structured failures go to stdout in JSON mode, stderr otherwise.
fn fail(report: &ErrorReport, json: bool) -> ExitCode {
    if json {
        print_json(report);
    } else {
        eprintln!("Error [{}]: {}", report.error_kind, report.message);
    }
    ExitCode::FAILURE
}
