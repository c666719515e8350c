//! mag-index - build and inspect the semantic index of a codebase

use clap::Parser;
use colored::Colorize;
use mag_core::{
    CancellationToken, Embedder, IndexMode, Indexer, MagError, OllamaBackend, Progress,
    RunSummary, SourceScanner, Workspace,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "mag-index")]
#[command(about = "Index a codebase for semantic search", long_about = None)]
struct Cli {
    /// Path to codebase root
    #[arg(long, default_value = ".")]
    codebase: PathBuf,

    /// Clear existing index before indexing
    #[arg(long)]
    clear: bool,

    /// Show index statistics and exit
    #[arg(long)]
    stats: bool,

    /// Check Ollama availability and exit
    #[arg(long)]
    check_ollama: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = if cli.check_ollama {
        cmd_check_ollama(&cli.codebase)
    } else if cli.stats {
        cmd_stats(&cli.codebase)
    } else {
        cmd_index(&cli.codebase, cli.clear)
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries progress and the summary
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_check_ollama(root: &Path) -> mag_core::Result<ExitCode> {
    let workspace = Workspace::open_or_init(root)?;
    let config = &workspace.config().ollama;
    let backend = OllamaBackend::new(config)?;

    println!("Checking Ollama connection...");
    match backend.list_models() {
        Ok(_) => {
            println!("{} Ollama is available at {}", "✓".green(), backend.host());
            for model in [&config.embedding_model, &config.llm_model] {
                let status = if backend.has_model(model)? {
                    "pulled".green()
                } else {
                    "missing".yellow()
                };
                println!("  {}: {}", model, status);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{} Cannot connect to Ollama at {}", "✗".red(), backend.host());
            println!("  {}", e);
            println!("  Please ensure Ollama is running:");
            println!("  - Install: https://ollama.ai/download");
            println!("  - Pull models: ollama pull {}", config.embedding_model);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cmd_stats(root: &Path) -> mag_core::Result<ExitCode> {
    let workspace = Workspace::open_or_init(root)?;
    let store = workspace.open_index()?;
    let manifest = store.load_manifest()?;
    let histogram = store.kind_histogram()?;
    let info = store.embedding_info()?;
    let source = SourceScanner::new(workspace.root(), &workspace.config().codebase)?.stats();

    println!("\n{}", "=== Source Tree ===".bold());
    println!("Files:        {}", source.total_files);
    println!(
        "Size:         {:.2} MB",
        source.total_bytes as f64 / (1024.0 * 1024.0)
    );
    println!(
        "Extensions:   {}",
        source.extensions.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    println!("\n{}", "=== Index Statistics ===".bold());
    println!("Files:        {}", manifest.len());
    println!("Total chunks: {}", store.count()?);
    println!(
        "Code types:   {}",
        histogram
            .iter()
            .map(|(kind, n)| format!("{} ({})", kind, n))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Model:        {}",
        info.model.as_deref().unwrap_or("N/A")
    );
    if let Some(dim) = info.dimension {
        println!("Dimension:    {}", dim);
    }
    if info.rebuild_required {
        println!("{}", "Rebuild required on next run".yellow());
    }
    println!(
        "Index:        {} ({:.2} MB)",
        workspace.index_path().display(),
        workspace.index_size_bytes() as f64 / (1024.0 * 1024.0)
    );
    println!();
    Ok(ExitCode::SUCCESS)
}

fn cmd_index(root: &Path, clear: bool) -> mag_core::Result<ExitCode> {
    let workspace = Workspace::open_or_init(root)?;
    let config = workspace.config();

    println!("\n{}", "=== MAG Codebase Indexing ===".bold());
    println!("Codebase: {}", workspace.root().display());
    println!("Index:    {}", workspace.index_path().display());
    println!("Ollama:   {}", config.ollama.host);
    println!();

    let backend = Arc::new(OllamaBackend::new(&config.ollama)?);
    let embedder = Arc::new(Embedder::new(backend, &config.indexing));

    let mode = if clear {
        info!("clearing existing index");
        workspace.reset_index()?;
        println!("{} Index cleared", "✓".green());
        IndexMode::FullRebuild
    } else {
        IndexMode::Incremental
    };

    let store = workspace.open_index()?;
    let mut indexer = Indexer::new(&workspace, store, embedder);

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    println!("Starting indexing...\n");
    let summary = match indexer.run_with_progress(mode, &cancel, &mut report_progress) {
        Ok(summary) => summary,
        Err(e @ MagError::BackendUnavailable(_)) => {
            error!(error = %e, "cannot reach the embedding backend");
            eprintln!("Error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e),
    };

    print_summary(&summary);

    if summary.cancelled {
        println!("\n\nIndexing interrupted by user");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    if summary.backend_unavailable() {
        error!("every file failed to embed, the backend looks unavailable");
        return Ok(ExitCode::FAILURE);
    }
    if summary.errors() > 0 {
        warn!(errors = summary.errors(), "some files had errors during indexing");
    }
    Ok(ExitCode::SUCCESS)
}

fn report_progress(p: Progress<'_>) {
    let pct = if p.total > 0 {
        p.current as f64 / p.total as f64 * 100.0
    } else {
        0.0
    };
    let mark = if p.ok { "ok".green() } else { "failed".red() };
    println!("[{}/{}] ({:.1}%) {} {}", p.current, p.total, pct, p.path, mark);
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "=== Indexing Complete ===".bold());
    println!(
        "Files: {} scanned, {} added, {} modified, {} removed, {} unchanged",
        summary.files_scanned,
        summary.files_added,
        summary.files_modified,
        summary.files_removed,
        summary.files_unchanged
    );
    println!("Files processed: {}", summary.files_processed);
    println!("Chunks created:  {}", summary.chunks_written);
    println!("Chunks removed:  {}", summary.chunks_deleted);
    println!("Embedding calls: {}", summary.embedding_calls);

    let errors = summary.errors().to_string();
    if summary.errors() > 0 {
        println!("Errors:          {}", errors.red());
        for failure in &summary.failures {
            println!("  {} [{:?}] {}", failure.path, failure.kind, failure.message);
        }
    } else {
        println!("Errors:          {}", errors);
    }
    println!("Elapsed:         {:.1}s", summary.duration.as_secs_f64());
}

/// Cancel `token` on the first Ctrl-C
fn watch_ctrl_c(token: CancellationToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "cannot install Ctrl-C handler");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing in-flight files");
                token.cancel();
            }
        });
    });
}
