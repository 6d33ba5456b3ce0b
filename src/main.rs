//! Spider Engine main entry point
//!
//! Command-line interface for managing and running stored spiders.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use spider_engine::config::{load_config_with_hash, Config};
use spider_engine::extract;
use spider_engine::storage::{open_storage, NewSpider, Storage};
use spider_engine::synth::RunMode;
use spider_engine::Orchestrator;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Spider Engine: runs stored scraping spiders as supervised processes
#[derive(Parser, Debug)]
#[command(name = "spider-engine")]
#[command(version)]
#[command(about = "Runs stored scraping spiders", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

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
    /// Store a new spider
    Add {
        /// Spider name (must be unique)
        name: String,

        /// Python file holding the spider body
        #[arg(long, value_name = "FILE")]
        code: Option<PathBuf>,

        /// JSON file holding the spider configuration (use `"type": "rules"` for rule spiders)
        #[arg(long, value_name = "FILE")]
        spider_config: Option<PathBuf>,

        #[arg(long)]
        description: Option<String>,
    },

    /// List stored spiders
    List,

    /// Run a spider and wait for it to finish (Ctrl-C stops it)
    Run { spider_id: i64 },

    /// Call a spider directly and print its result as JSON
    Call {
        spider_id: i64,

        /// Python file to run instead of the stored body
        #[arg(long, value_name = "FILE")]
        code: Option<PathBuf>,
    },

    /// Show recent log entries of a spider
    Logs {
        spider_id: i64,

        #[arg(short = 'n', long, default_value_t = 50)]
        limit: u32,

        /// Show all entries of one execution instead
        #[arg(long)]
        execution: Option<String>,
    },

    /// List files registered for a spider
    Files { spider_id: i64 },

    /// Run a rule program (used by the engine itself)
    #[command(hide = true)]
    Worker {
        #[arg(long, value_name = "FILE")]
        ruleset: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Worker { ruleset } => Ok(ExitCode::from(run_worker(&ruleset, cli.verbose).await)),
        Command::Add {
            name,
            code,
            spider_config,
            description,
        } => {
            let config = prepare(cli.config.as_deref(), cli.verbose, cli.quiet)?;
            handle_add(&config, name, code, spider_config, description)
        }
        Command::List => {
            let config = prepare(cli.config.as_deref(), cli.verbose, cli.quiet)?;
            handle_list(&config)
        }
        Command::Run { spider_id } => {
            let config = prepare(cli.config.as_deref(), cli.verbose, cli.quiet)?;
            handle_run(config, spider_id).await
        }
        Command::Call { spider_id, code } => {
            let config = prepare(cli.config.as_deref(), cli.verbose, cli.quiet)?;
            handle_call(config, spider_id, code).await
        }
        Command::Logs {
            spider_id,
            limit,
            execution,
        } => {
            let config = prepare(cli.config.as_deref(), cli.verbose, cli.quiet)?;
            handle_logs(&config, spider_id, limit, execution)
        }
        Command::Files { spider_id } => {
            let config = prepare(cli.config.as_deref(), cli.verbose, cli.quiet)?;
            handle_files(&config, spider_id)
        }
    }
}

/// Sets up logging and loads the configuration for engine commands
fn prepare(config: Option<&Path>, verbose: u8, quiet: bool) -> anyhow::Result<Config> {
    setup_logging(verbose, quiet);
    load_engine_config(config)
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("spider_engine=info,warn"),
            1 => EnvFilter::new("spider_engine=debug,info"),
            2 => EnvFilter::new("spider_engine=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_engine_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        tracing::debug!("No configuration file given, using defaults");
        return Ok(Config::default());
    };

    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok(config)
}

/// Runs a rule program inside a spider child process
///
/// Files-mode logs go to stdout so the engine stores them as spider output;
/// direct-mode logs go to stderr to keep stdout for the result object.
async fn run_worker(ruleset: &Path, verbose: u8) -> u8 {
    let program = match extract::load_program(ruleset) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("ERROR: Failed to load rule program {}: {}", ruleset.display(), e);
            return 1;
        }
    };

    let filter = if verbose > 0 { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_ansi(false);
    match program.mode {
        RunMode::Files => builder.with_writer(std::io::stdout).init(),
        RunMode::Direct => builder.with_writer(std::io::stderr).init(),
    }

    let code = extract::execute(&program, &extract::output_dir_from_env()).await;
    u8::try_from(code).unwrap_or(1)
}

fn handle_add(
    config: &Config,
    name: String,
    code: Option<PathBuf>,
    spider_config: Option<PathBuf>,
    description: Option<String>,
) -> anyhow::Result<ExitCode> {
    let code = match code {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => String::new(),
    };
    let spider_config = match spider_config {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?
        }
        None => serde_json::Value::Object(Default::default()),
    };

    let mut storage = open_storage(Path::new(&config.storage.database_path))?;
    let id = storage.create_spider(&NewSpider {
        name,
        description,
        code,
        config: spider_config,
    })?;

    println!("{}", id);
    Ok(ExitCode::SUCCESS)
}

fn handle_list(config: &Config) -> anyhow::Result<ExitCode> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let spiders = storage.list_spiders()?;

    println!(
        "{:>5}  {:<24} {:<9} {:>5} {:>5} {:>5}  {}",
        "ID", "NAME", "STATUS", "RUNS", "OK", "ERR", "LAST RUN"
    );
    for spider in spiders {
        println!(
            "{:>5}  {:<24} {:<9} {:>5} {:>5} {:>5}  {}",
            spider.id,
            spider.name,
            spider.status,
            spider.run_count,
            spider.success_count,
            spider.error_count,
            spider.last_run_at.as_deref().unwrap_or("-")
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_run(config: Config, spider_id: i64) -> anyhow::Result<ExitCode> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let orchestrator = Orchestrator::new(config, storage)?;

    let execution_id = orchestrator.start(spider_id)?;
    println!("Execution {}", execution_id);

    tokio::select! {
        _ = orchestrator.wait_for_completion(spider_id) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping spider {}", spider_id);
            if let Err(e) = orchestrator.stop(spider_id).await {
                tracing::warn!("Stop of spider {} did not complete: {}", spider_id, e);
            }
            orchestrator.wait_for_completion(spider_id).await;
        }
    }

    let storage = orchestrator.storage();
    let record = spider_engine::storage::lock(&storage)?
        .get_spider(spider_id)?
        .context("Spider disappeared during the run")?;
    println!("Spider {} finished with status {}", record.name, record.status);

    Ok(if record.status.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn handle_call(config: Config, spider_id: i64, code: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let code = match code {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let orchestrator = Orchestrator::new(config, storage)?;
    let result = orchestrator.run_synchronous(spider_id, code.as_deref()).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn handle_logs(
    config: &Config,
    spider_id: i64,
    limit: u32,
    execution: Option<String>,
) -> anyhow::Result<ExitCode> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    if storage.get_spider(spider_id)?.is_none() {
        bail!("Spider {} not found", spider_id);
    }

    let entries = match execution {
        Some(execution_id) => storage.get_execution_logs(&execution_id)?,
        None => {
            let mut entries = storage.get_spider_logs(spider_id, limit)?;
            entries.reverse();
            entries
        }
    };

    for entry in entries {
        let source = entry.source.map(|s| s.to_db_string()).unwrap_or("-");
        println!("{} [{}] {}: {}", entry.timestamp, entry.level, source, entry.message);
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_files(config: &Config, spider_id: i64) -> anyhow::Result<ExitCode> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    for file in storage.get_spider_files(spider_id)? {
        println!(
            "{:>5}  {:<6} {:>9}  {}  {}",
            file.id, file.file_type, file.size, file.created_at, file.path
        );
    }
    Ok(ExitCode::SUCCESS)
}
