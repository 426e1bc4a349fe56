//! Quota-Harvest main entry point
//!
//! This is the command-line interface for the Quota-Harvest crawler.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use quota_harvest::config::{load_config_with_hash, load_keys_file, Config};
use quota_harvest::crawler::{Orchestrator, PoolOutcome, RunReport};
use quota_harvest::credentials::{Credential, CredentialPool};
use quota_harvest::entity::EntityKind;
use quota_harvest::output::{load_statistics, print_statistics};
use quota_harvest::queue::{LineQueue, QueueDispatcher};
use quota_harvest::retry::RetryPolicy;
use quota_harvest::source::YouTubeClient;
use quota_harvest::state::TargetStatus;
use quota_harvest::storage::{open_storage, RunStatus, SqliteStorage, Storage};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Quota-Harvest: a quota-aware crawler for rate-limited content APIs
///
/// Quota-Harvest rotates API keys so no key exceeds its daily budget, and
/// walks channels, videos and comments through a resumable pipeline.
#[derive(Parser, Debug)]
#[command(name = "quota-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A quota-aware crawler for rate-limited content APIs", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search keywords and crawl everything they turn up
    Keywords {
        /// Keywords to search
        keywords: Vec<String>,

        /// File with one keyword per line
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Crawl parents by id, or by handle/custom name with --key
    Parent {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Treat the arguments as alternate keys to resolve
        #[arg(long)]
        key: bool,
    },

    /// Crawl children by id, or by URL-like locator with --locator
    Child {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Treat the arguments as locators (watch, youtu.be, playlist, channel URLs)
        #[arg(long)]
        locator: bool,
    },

    /// Fetch details for every parent and child still at to_crawl
    DetailBacklog,

    /// List the children of every parent at crawled_parent
    ExpandBacklog,

    /// Fetch leaves for every child at crawled_detail
    LeafBacklog,

    /// Consume newline-delimited JSON queue messages
    Consume {
        /// Read messages from a file instead of stdin
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Store a new API key
    AddKey {
        id: String,
        secret: String,

        /// Starting budget (defaults to the configured daily budget)
        #[arg(long)]
        budget: Option<i64>,
    },

    /// Store every key listed in a keys file, one per line
    ImportKeys {
        /// Keys file (defaults to `keys-file` from the configuration)
        file: Option<PathBuf>,
    },

    /// Restore every API key to a full budget
    ResetQuota {
        /// Budget to restore (defaults to the configured daily budget)
        #[arg(long)]
        budget: Option<i64>,
    },

    /// Return errored records and targets to to_crawl
    ResetErrors {
        /// Also release targets left in crawling by an interrupted run
        #[arg(long)]
        crawling: bool,
    },

    /// Show statistics from the database
    Stats,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Keywords { .. } => "keywords",
            Self::Parent { .. } => "parent",
            Self::Child { .. } => "child",
            Self::DetailBacklog => "detail-backlog",
            Self::ExpandBacklog => "expand-backlog",
            Self::LeafBacklog => "leaf-backlog",
            Self::Consume { .. } => "consume",
            Self::AddKey { .. } => "add-key",
            Self::ImportKeys { .. } => "import-keys",
            Self::ResetQuota { .. } => "reset-quota",
            Self::ResetErrors { .. } => "reset-errors",
            Self::Stats => "stats",
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("Failed to open {}", config.output.database_path))?;

    match cli.command {
        Command::Stats => handle_stats(&config, &storage),
        Command::AddKey { id, secret, budget } => {
            handle_add_key(&config, &storage, &id, &secret, budget)
        }
        Command::ImportKeys { file } => handle_import_keys(&config, &storage, file),
        Command::ResetQuota { budget } => handle_reset_quota(&config, &storage, budget),
        Command::ResetErrors { crawling } => handle_reset_errors(&storage, crawling),
        command => handle_crawl(&config, &config_hash, &storage, command),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("quota_harvest=info,warn"),
            1 => EnvFilter::new("quota_harvest=debug,info"),
            2 => EnvFilter::new("quota_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_file(false)
        .with_writer(io::stderr)
        .init();
}

/// Handles the stats command: shows statistics from the database
fn handle_stats(config: &Config, storage: &SqliteStorage) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);
    let stats = load_statistics(storage)?;
    print_statistics(&stats);
    Ok(())
}

fn handle_add_key(
    config: &Config,
    storage: &SqliteStorage,
    id: &str,
    secret: &str,
    budget: Option<i64>,
) -> anyhow::Result<()> {
    let budget = budget.unwrap_or(config.credentials.daily_budget);
    if budget < 0 {
        bail!("Budget must not be negative");
    }
    let credential = Credential::new(id, secret, budget);
    if storage.add_credential(&credential)? {
        println!("✓ Added key {} with budget {}", id, budget);
    } else {
        println!("Key {} already exists", id);
    }
    Ok(())
}

fn handle_import_keys(
    config: &Config,
    storage: &SqliteStorage,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let Some(path) = file.or_else(|| config.credentials.keys_file.as_ref().map(PathBuf::from))
    else {
        bail!("No keys file given and no keys-file configured");
    };
    let keys = load_keys_file(&path)
        .with_context(|| format!("Failed to read keys from {}", path.display()))?;

    let mut added = 0;
    for secret in &keys {
        let credential = Credential::from_secret(secret.as_str(), config.credentials.daily_budget);
        if storage.add_credential(&credential)? {
            tracing::info!(credential = %credential.id, "Imported key");
            added += 1;
        }
    }

    println!(
        "✓ Imported {} of {} keys from {} ({} already stored)",
        added,
        keys.len(),
        path.display(),
        keys.len() - added
    );
    Ok(())
}

/// Handles the reset-quota command: the daily scheduler hook
fn handle_reset_quota(
    config: &Config,
    storage: &SqliteStorage,
    budget: Option<i64>,
) -> anyhow::Result<()> {
    let budget = budget.unwrap_or(config.credentials.daily_budget);
    if budget <= 0 {
        bail!("Budget must be positive");
    }
    let reset = storage.reset_credentials(budget)?;
    tracing::info!(reset, budget, "Credential budgets reset");
    println!("✓ Reset {} keys to {}", reset, budget);
    Ok(())
}

fn handle_reset_errors(storage: &SqliteStorage, crawling: bool) -> anyhow::Result<()> {
    let parents = storage.reset_errors(EntityKind::Parent)?;
    let children = storage.reset_errors(EntityKind::Child)?;

    let mut from = vec![TargetStatus::Error];
    if crawling {
        from.push(TargetStatus::Crawling);
    }
    let targets = storage.reset_targets(&from)?;

    println!(
        "✓ Reset {} parents, {} children and {} targets to to_crawl",
        parents, children, targets
    );
    Ok(())
}

/// Handles every command that calls the remote API
fn handle_crawl(
    config: &Config,
    config_hash: &str,
    storage: &SqliteStorage,
    command: Command,
) -> anyhow::Result<()> {
    let pool = CredentialPool::from_records(storage.load_credentials()?);
    if pool.is_empty() {
        bail!("No API keys stored; add one with `add-key`");
    }
    tracing::info!(
        keys = pool.len(),
        budget = pool.total_remaining(),
        "Credential pool loaded"
    );

    let source = YouTubeClient::new(&config.source).context("Failed to build HTTP client")?;
    let retry = RetryPolicy::from(&config.retry);
    let orchestrator = Orchestrator::new(storage, &pool, &source, &retry, &config.crawler);

    let run_id = storage.create_run(config_hash, command.name())?;
    tracing::info!(run_id, command = command.name(), "Run started");

    let result = run_command(&orchestrator, command, config.queue.max_redeliveries);

    let status = match &result {
        Ok(true) => RunStatus::Completed,
        Ok(false) | Err(_) => RunStatus::Failed,
    };
    storage.finish_run(run_id, status)?;
    tracing::info!(run_id, status = status.to_db_string(), "Run finished");

    result.map(|_| ())
}

/// Runs one crawl command; returns false if any unit of work failed
fn run_command(
    orchestrator: &Orchestrator<'_>,
    command: Command,
    max_redeliveries: u32,
) -> anyhow::Result<bool> {
    let workers = orchestrator.worker_pool();
    let outcome = match command {
        Command::Keywords { mut keywords, file } => {
            if let Some(path) = file {
                let reader = BufReader::new(
                    File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?,
                );
                for line in reader.lines() {
                    let line = line?;
                    if !line.trim().is_empty() {
                        keywords.push(line.trim().to_string());
                    }
                }
            }
            if keywords.is_empty() {
                bail!("No keywords given");
            }
            orchestrator.run_for_keywords(&keywords)
        }
        Command::Parent { ids, key: true } => {
            workers.run(&ids, |key| orchestrator.run_for_parent_key(key))
        }
        Command::Parent { ids, key: false } => {
            workers.run(&ids, |id| orchestrator.run_for_parent_id(id))
        }
        Command::Child { ids, locator: true } => {
            workers.run(&ids, |locator| orchestrator.run_for_child_locator(locator))
        }
        Command::Child { ids, locator: false } => {
            workers.run(&ids, |id| orchestrator.run_for_child_id(id))
        }
        Command::DetailBacklog => orchestrator.drain_detail_backlog()?,
        Command::ExpandBacklog => orchestrator.drain_expand_backlog()?,
        Command::LeafBacklog => orchestrator.drain_leaf_backlog()?,
        Command::Consume { input } => return consume(orchestrator, input, max_redeliveries),
        other => bail!("{} is not a crawl command", other.name()),
    };

    Ok(print_outcome(&outcome))
}

fn consume(
    orchestrator: &Orchestrator<'_>,
    input: Option<PathBuf>,
    max_redeliveries: u32,
) -> anyhow::Result<bool> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let mut queue = LineQueue::new(reader, max_redeliveries);
    let dispatcher = QueueDispatcher::new(orchestrator);

    let summary = dispatcher.consume(&mut queue)?;
    println!("{}", summary);
    Ok(!summary.stopped_exhausted)
}

fn print_outcome(outcome: &PoolOutcome<RunReport>) -> bool {
    println!("=== Run Report ===\n");
    println!("{}", outcome.total);
    println!();
    println!(
        "Units: {} succeeded, {} failed",
        outcome.succeeded, outcome.failed
    );
    for (partition, error) in &outcome.errors {
        println!("  worker {}: {}", partition, error);
    }
    if outcome.credentials_exhausted() {
        println!("Credentials exhausted; rerun after `reset-quota`");
    }
    outcome.failed == 0 && outcome.errors.is_empty()
}
