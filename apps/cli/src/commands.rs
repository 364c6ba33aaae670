//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use sieve_core::{
    JsonReport, Orchestrator, PluginRegistry, ProgressEvent, ProgressKind, ProgressSink,
    ReportGenerator, RunResult,
};
use sieve_feed::HttpFeed;
use sieve_inference::{InferenceClient, InferenceConfig};
use sieve_shared::{
    AppConfig, InterestLevel, ProviderKind, config_dir, config_file_path, init_config,
    init_config_at, load_config, load_config_from, resolve_target,
};
use sieve_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DB_FILE_NAME: &str = "sieve.db";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sieve: classify, summarize and collect what matters from your feeds.
#[derive(Parser)]
#[command(
    name = "sieve",
    version,
    about = "Fetch feeds, grade every item with an LLM, and publish the interesting ones.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.sieve/sieve.toml).
    #[arg(short, long, global = true, env = "SIEVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch every source, classify new items, and write the report.
    Run {
        /// Item database (defaults to ~/.sieve/sieve.db).
        #[arg(short, long)]
        db: Option<PathBuf>,

        /// Report path (overrides `output.json_path`).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip report generation.
        #[arg(long)]
        no_report: bool,
    },

    /// Regenerate the report from stored items without fetching anything.
    Report {
        /// Item database (defaults to ~/.sieve/sieve.db).
        #[arg(short, long)]
        db: Option<PathBuf>,

        /// Report path (overrides `output.json_path`).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a starter config file.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sieve=info",
        1 => "sieve=debug",
        _ => "sieve=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            db,
            output,
            no_report,
        } => cmd_run(config_path, db, output, no_report).await,
        Command::Report { db, output } => cmd_report(config_path, db, output).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path).await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

fn report_path(config: &AppConfig, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| PathBuf::from(&config.output.json_path))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    db: Option<PathBuf>,
    output: Option<PathBuf>,
    no_report: bool,
) -> Result<()> {
    let config = read_config(config_path)?;
    config.validate()?;
    check_credentials(&config)?;

    let db_path = db_path(db)?;
    let report_path = report_path(&config, output);
    let timeout = config.inference_timeout();

    let storage = Arc::new(Storage::open(&db_path).await?);
    let feed = Arc::new(HttpFeed::new(timeout)?);
    let classifier = Arc::new(InferenceClient::new(InferenceConfig::from_app_config(&config))?);
    let plugins = Arc::new(PluginRegistry::with_builtins(timeout)?);

    info!(
        db = %db_path.display(),
        sources = config.sources.len(),
        "starting sieve run"
    );

    let progress = Arc::new(CliProgress::new());
    let mut orchestrator = Orchestrator::new(config, feed, storage, classifier)
        .with_plugins(plugins)
        .with_progress(progress.clone());
    if !no_report {
        orchestrator = orchestrator.with_report(Arc::new(JsonReport::new(&report_path)));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let outcome = orchestrator.run(&cancel).await;
    progress.finish();
    let result = outcome?;

    print_summary(&result, (!no_report).then_some(report_path.as_path()));
    Ok(())
}

/// Fail early when a source needs a provider whose key is missing.
fn check_credentials(config: &AppConfig) -> Result<()> {
    let mut needed: Vec<ProviderKind> = Vec::new();
    for source in &config.sources {
        let kind = resolve_target(&config.global.ai, &source.ai).provider;
        if !needed.contains(&kind) {
            needed.push(kind);
        }
    }

    for kind in needed {
        let settings = config.providers.get(kind);
        if settings.api_key().is_none() {
            return Err(eyre!(
                "no API key for {kind}: set the {} environment variable",
                settings.api_key_env
            ));
        }
    }
    Ok(())
}

fn print_summary(result: &RunResult, report: Option<&Path>) {
    println!();
    println!("  Run complete");
    println!("  Sources:       {} ok, {} failed", result.sources_processed, result.sources_failed.len());
    println!("  New items:     {}", result.items_processed);
    println!("  High interest: {}", result.items_high_interest);
    println!("  Skipped:       {}", result.items_skipped);
    println!("  Failed:        {}", result.items_failed);
    println!("  Time:          {:.1}s", result.elapsed.as_secs_f64());
    for failure in &result.sources_failed {
        println!("  ! {} ({}): {}", failure.name, failure.url, failure.error);
    }
    match (&result.report_error, report) {
        (Some(error), _) => println!("  Report failed: {error}"),
        (None, Some(path)) => println!("  Report:        {}", path.display()),
        (None, None) => {}
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner driven by run progress events.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressSink for CliProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event.kind {
            ProgressKind::ItemDone if event.level == Some(InterestLevel::HighInterest) => {
                if let Some(title) = &event.item {
                    self.spinner.println(format!("  ⭐⭐ [{}] {title}", event.source));
                }
            }
            ProgressKind::SourceDone if event.message.is_some() => {
                self.spinner.println(format!("  {}", event.describe()));
            }
            _ => {}
        }
        self.spinner.set_message(event.describe());
    }
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

async fn cmd_report(
    config_path: Option<&Path>,
    db: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = read_config(config_path)?;
    let db_path = db_path(db)?;
    let storage = Storage::open_readonly(&db_path).await?;

    let counts = storage.count_by_level().await?;
    for (level, count) in &counts {
        info!(%level, count, "stored items");
    }

    let summary = JsonReport::new(report_path(&config, output))
        .generate(&storage)
        .await?;
    println!(
        "Report written to {} ({} items)",
        summary.path.display(),
        summary.total_items
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    let config = read_config(config_path)?;
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
