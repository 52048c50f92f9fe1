//! CLI entry point for the Cortex backend: ingest, search, enhance and watch a Logseq graph.

use std::path::{Path, PathBuf};

use clap::Parser;
use cortex_core::search::{parse_date, DEFAULT_LIMIT};
use cortex_core::{
    app_data_dir, chunk_notes, config, scan_notes, watch_notes, Brain, Collection, Config,
    RunStats, SearchOutcome, Task,
};
use tracing::{info, warn};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "cortex")]
#[command(about = "Cortex: semantic search and LLM enhancement for your Logseq notes")]
struct Cli {
    /// Config file to use instead of the one in the app data directory.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show component readiness and index size.
    Status,
    /// Show where Cortex stores its config and index (app data directory).
    DataDir,
    /// Scan a directory for markdown notes and list them.
    Scan {
        /// Root directory to scan (your Logseq graph).
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Index the notes directory.
    Process {
        /// Notes directory (overrides the configured one).
        #[arg(long, value_name = "PATH")]
        notes: Option<PathBuf>,
        /// Re-index notes even if they did not change.
        #[arg(long)]
        force: bool,
    },
    /// Semantic search over indexed notes.
    Search {
        query: String,
        /// all, notes or journals.
        #[arg(long, default_value = "all")]
        collection: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// List chunks carrying a tag.
    Tag {
        tag: String,
        /// all, notes or journals.
        #[arg(long, default_value = "all")]
        collection: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Show journal entries of a day (YYYY-MM-DD).
    Date {
        date: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Run an LLM task (enhance, summarize, tag) on text or a file.
    Enhance {
        task: String,
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Show stats of the last ingestion run.
    Stats,
    /// Index, then re-index whenever notes change (Ctrl+C to stop).
    Watch {
        #[arg(long, value_name = "PATH")]
        notes: Option<PathBuf>,
    },
    /// Set and save the notes directory.
    SetNotes {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// List models available on the Ollama server.
    Models,
}

#[tokio::main]
async fn main() -> CliResult {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => status(config).await,
        Commands::DataDir => {
            match app_data_dir() {
                Some(p) => println!("{}", p.display()),
                None => eprintln!("Could not determine app data directory."),
            }
            Ok(())
        }
        Commands::Scan { path } => scan(&path, &config),
        Commands::Process { notes, force } => {
            let brain = Brain::from_config(with_notes(config, notes))?;
            let stats = brain.process_all(force).await?;
            print_stats(&stats)
        }
        Commands::Search {
            query,
            collection,
            limit,
        } => {
            let collection: Collection = collection.parse()?;
            let brain = Brain::from_config(config)?;
            let outcome = brain.search(&query, collection, limit).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Tag {
            tag,
            collection,
            limit,
        } => {
            let collection: Collection = collection.parse()?;
            let brain = Brain::from_config(config)?;
            let outcome = brain.search_by_tag(&tag, collection, limit).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Date { date, limit } => {
            let date = parse_date(&date)?;
            let brain = Brain::from_config(config)?;
            let outcome = brain.search_by_date(date, limit).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Enhance { task, text, file } => {
            let task: Task = task.parse()?;
            let content = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => String::new(),
            };
            let brain = Brain::from_config(config)?;
            println!("{}", brain.enhance(&content, task).await?);
            Ok(())
        }
        Commands::Stats => {
            let brain = Brain::from_config(config)?;
            let stats = brain.stats();
            if stats.has_run() {
                print_stats(&stats)
            } else {
                println!("No processing has been run yet.");
                Ok(())
            }
        }
        Commands::Watch { notes } => watch(with_notes(config, notes)).await,
        Commands::SetNotes { path } => {
            cortex_core::set_notes_root(&path)?;
            println!("Notes directory set to {}", path.display());
            Ok(())
        }
        Commands::Models => {
            let brain = Brain::from_config(config)?;
            for model in brain.models().await? {
                println!("{}", model);
            }
            Ok(())
        }
    }
}

fn load(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut config = match path {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn with_notes(mut config: Config, notes: Option<PathBuf>) -> Config {
    if let Some(notes) = notes {
        config.notes_root = Some(notes.to_string_lossy().into_owned());
    }
    config
}

async fn status(config: Config) -> CliResult {
    let brain = Brain::from_config(config)?;
    let status = brain.status().await;
    let (documents, chunks) = brain.index_size().await;
    println!("Cortex backend");
    match brain.config().notes_root_path() {
        Some(root) => println!("  notes:        {}", root.display()),
        None => println!("  notes:        (not set, use `cortex set-notes <PATH>`)"),
    }
    println!("  parser:       {}", ok(status.components.parser));
    println!("  llm:          {}", ok(status.components.llm));
    println!("  vector store: {}", ok(status.components.vector_store));
    println!("  index:        {} notes, {} chunks", documents, chunks);
    println!("  ready:        {}", status.is_ready);
    Ok(())
}

fn ok(up: bool) -> &'static str {
    if up {
        "ok"
    } else {
        "unavailable"
    }
}

fn scan(path: &Path, config: &Config) -> CliResult {
    let notes = scan_notes(path)?;
    let chunks = chunk_notes(&notes, &config.chunking);
    println!(
        "Scanned {} note(s) under {} ({} chunks of up to {} chars)",
        notes.len(),
        path.display(),
        chunks.len(),
        config.chunking.max_chars
    );
    for n in notes {
        let count = chunks.iter().filter(|c| c.parent_id == n.id).count();
        let date = n
            .journal_date
            .map(|d| d.to_string())
            .unwrap_or_default();
        let tags: Vec<&str> = n.tags.iter().map(String::as_str).collect();
        println!(
            "  {}  {}  {}  [{}]  {} chunk(s)",
            n.source_path.display(),
            n.title,
            date,
            tags.join(", "),
            count
        );
    }
    Ok(())
}

async fn watch(config: Config) -> CliResult {
    let root = config
        .notes_root_path()
        .ok_or("no notes directory configured (use --notes or `cortex set-notes`)")?;
    let brain = Brain::from_config(config)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = watch_notes(&root, move |paths| {
        let _ = tx.send(paths);
    })?;

    report(&brain.process_all(false).await?);
    loop {
        tokio::select! {
            Some(paths) = rx.recv() => {
                let mut changed = paths.len();
                while let Ok(more) = rx.try_recv() {
                    changed += more.len();
                }
                info!("{} note(s) changed, re-indexing", changed);
                match brain.process_all(false).await {
                    Ok(stats) => report(&stats),
                    Err(e) => warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping watcher");
                return Ok(());
            }
        }
    }
}

fn report(stats: &RunStats) {
    println!(
        "{:?}: {} pages, {} journals, {} unchanged, {} errors, {} removed",
        stats.status,
        stats.pages_processed,
        stats.journals_processed,
        stats.unchanged,
        stats.errors,
        stats.removed
    );
}

fn print_stats(stats: &RunStats) -> CliResult {
    println!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    if let Some(synthesis) = &outcome.synthesis {
        println!("{}\n{}\n", synthesis.title, synthesis.text);
    }
    if outcome.results.is_empty() {
        println!("No matching notes.");
    }
    for (i, hit) in outcome.results.iter().enumerate() {
        let meta = &hit.chunk.metadata;
        let date = meta
            .journal_date
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        let label = if hit.chunk.is_summary() { " [summary]" } else { "" };
        println!(
            "{}. {}{}{}  score {:.3}  {}",
            i + 1,
            meta.title,
            date,
            label,
            hit.score,
            meta.source_path.display()
        );
        println!("   {}", preview(hit.chunk.body(), 120));
    }
}

/// First line of `text`, cut to `max` characters.
fn preview(text: &str, max: usize) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() > max {
        format!("{}...", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}
