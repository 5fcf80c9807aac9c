//! Benchy CLI Library
//!
//! Command-line front end and worker entry point. The `benchy` binary is
//! both: invoked normally it runs suites and spawns copies of itself with
//! `--benchy-worker` to execute each benchmark in isolation.
//!
//! # Example
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     benchy_cli::run()
//! }
//! ```

mod config;
mod executor;
mod planner;
mod suite;
mod supervisor;

pub use config::*;
pub use executor::{
    ExecutorConfig, IsolatedExecutor, MemorySampling, OutputFormat, RunError, SuiteEntry,
    SuiteReport, SuiteRunner, format_human_output, format_report, persist,
};
pub use planner::{ExecutionPlan, build_plan};
pub use suite::{LoadedSuite, SuiteError};
pub use supervisor::*;

use anyhow::Context;
use benchy_core::{Fingerprint, WorkerMain};
use benchy_ipc::EngineKind;
use benchy_store::ResultStore;
use clap::{Args, CommandFactory, Parser, Subcommand};
use regex::Regex;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Benchy CLI arguments
#[derive(Parser, Debug)]
#[command(name = "benchy")]
#[command(author, version, about = "Benchy - isolated timing of code fragments")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: Run as worker process (used by supervisor)
    #[arg(long = "benchy-worker", hide = true)]
    pub benchy_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a suite file
    Run(RunArgs),
    /// List the benchmarks of a suite file with their fingerprints
    List {
        /// Suite file
        suite: PathBuf,
        /// Only list benchmarks whose name matches this regex
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show stored definitions, or the history of one benchmark
    History {
        /// Result database (defaults to benchy.toml's [store] path)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Fingerprint of the benchmark
        fingerprint: Option<String>,
    },
    /// Write a default benchy.toml to the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Arguments of `benchy run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suite file
    pub suite: PathBuf,

    /// Persist results to this SQLite database
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Per-benchmark timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Unit policy: auto, s, ms, us or ns
    #[arg(long)]
    pub units: Option<String>,

    /// Fragment engine: expr or shell
    #[arg(long)]
    pub engine: Option<String>,

    /// Sample peak resident memory
    #[arg(long)]
    pub memory: bool,

    /// Where memory trials run
    #[arg(long, value_enum)]
    pub memory_mode: Option<MemoryMode>,

    /// Baseline benchmark name for relative timings
    #[arg(long)]
    pub reference: Option<String>,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Benchmarks run concurrently (distorts timings)
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Only run benchmarks whose name matches this regex
    #[arg(long)]
    pub filter: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Run the Benchy CLI with the process arguments.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Benchy CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Handle worker mode first (before any other initialization)
    if cli.benchy_worker {
        return run_worker_mode();
    }

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("benchy=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("benchy=info")
            .with_writer(std::io::stderr)
            .init();
    }

    // Discover benchy.toml configuration (CLI flags override)
    let config = BenchyConfig::discover().unwrap_or_default();

    match cli.command {
        Some(Commands::Run(args)) => run_suite(&args, &config),
        Some(Commands::List { suite, filter }) => list_benchmarks(&suite, filter.as_deref()),
        Some(Commands::History { db, fingerprint }) => {
            show_history(db.or(config.store.path.clone()), fingerprint.as_deref())
        }
        Some(Commands::Init { force }) => init_config(force),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    // stdout is not ours; the supervisor captures stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter("benchy=warn")
        .with_writer(std::io::stderr)
        .try_init();

    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

fn compile_filter(filter: Option<&str>) -> anyhow::Result<Option<Regex>> {
    filter
        .map(|f| Regex::new(f).with_context(|| format!("invalid --filter {f:?}")))
        .transpose()
}

fn list_benchmarks(path: &PathBuf, filter: Option<&str>) -> anyhow::Result<()> {
    let loaded = LoadedSuite::load(path)?;
    let filter = compile_filter(filter)?;
    let plan = build_plan(&loaded.suite, filter.as_ref());

    println!("Suite: {}", loaded.suite.name);
    for bench in &plan.benchmarks {
        let marker = if loaded.reference.as_deref() == Some(bench.name.as_str()) {
            " (reference)"
        } else {
            ""
        };
        println!("├── {}  {}{}", bench.fingerprint().short(), bench.display_name(), marker);
    }
    println!("{} benchmarks found.", plan.benchmarks.len());
    if plan.skipped > 0 {
        println!("{} filtered out.", plan.skipped);
    }
    Ok(())
}

/// Build the executor configuration by layering: benchy.toml → suite file → CLI.
fn build_executor_config(
    args: &RunArgs,
    config: &BenchyConfig,
    suite_engine: Option<EngineKind>,
) -> anyhow::Result<ExecutorConfig> {
    let mut config = config.clone();
    if let Some(units) = &args.units {
        config.runner.units = units.clone();
    }
    if args.memory {
        config.memory.enabled = true;
    }
    if let Some(mode) = args.memory_mode {
        config.memory.mode = mode;
        config.memory.enabled = true;
    }

    let engine = match &args.engine {
        Some(engine) => engine.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => suite_engine.unwrap_or(config.runner.engine),
    };
    let timeout = match args.timeout {
        Some(secs) if secs > 0.0 => match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => timeout,
            Err(e) => anyhow::bail!("invalid --timeout {secs}: {e}"),
        },
        Some(secs) => anyhow::bail!("invalid --timeout {secs}"),
        None => config.timeout()?,
    };

    let mut executor = ExecutorConfig::new(default_worker_binary()?);
    executor.timeout = timeout;
    executor.engine = engine;
    executor.timing = config.timing_config()?;
    executor.memory = config.memory.enabled.then_some(MemorySampling {
        mode: config.memory.mode,
        repeat: config.memory.repeat.max(1),
    });
    Ok(executor)
}

fn run_suite(args: &RunArgs, config: &BenchyConfig) -> anyhow::Result<()> {
    let loaded = LoadedSuite::load(&args.suite)?;
    let filter = compile_filter(args.filter.as_deref())?;
    let plan = build_plan(&loaded.suite, filter.as_ref());

    if plan.benchmarks.is_empty() {
        println!("No benchmarks found.");
        return Ok(());
    }

    let format = match args.format {
        Some(format) => format,
        None => config
            .output
            .format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
    };
    let jobs = args.jobs.or(config.runner.jobs).unwrap_or(1).max(1);
    let executor = build_executor_config(args, config, loaded.engine)?;
    // A suite-file reference removed by --filter falls back to the fastest
    let suite_reference = loaded.reference.filter(|name| {
        let kept = plan.benchmarks.iter().any(|b| &b.name == name);
        if !kept {
            tracing::warn!("reference {name:?} filtered out; using the fastest benchmark");
        }
        kept
    });
    let reference = args.reference.clone().or(suite_reference);

    let mut store = match args.db.clone().or(config.store.path.clone()) {
        Some(path) => Some(
            ResultStore::open(&path)
                .with_context(|| format!("cannot open result store {}", path.display()))?,
        ),
        None => None,
    };

    eprintln!(
        "Running {} benchmarks ({} engine, timeout {:?}, {} job(s))...",
        plan.benchmarks.len(),
        executor.engine,
        executor.timeout,
        jobs
    );

    let runner = SuiteRunner::new(IsolatedExecutor::new(executor), jobs)
        .with_progress(format == OutputFormat::Human);
    let report = runner.run(
        &loaded.suite.name,
        &loaded.suite.description,
        plan.benchmarks,
        reference.as_deref(),
        store.as_mut(),
    )?;

    let output = format_report(&report, format)?;
    if let Some(ref path) = args.output {
        let mut file = std::fs::File::create(path)?;
        file.write_all(output.as_bytes())?;
        eprintln!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
    }

    let failed = report.failures();
    if failed > 0 {
        eprintln!("\n{} benchmark(s) failed", failed);
        std::process::exit(1);
    }
    Ok(())
}

fn show_history(db: Option<PathBuf>, fingerprint: Option<&str>) -> anyhow::Result<()> {
    let path = db.ok_or_else(|| anyhow::anyhow!("--db required (or set [store] path in benchy.toml)"))?;
    if !path.exists() {
        anyhow::bail!("Result store not found: {}", path.display());
    }
    let store = ResultStore::open(&path)?;

    match fingerprint {
        None => print!("{}", executor::format_definitions(&store.definitions()?)),
        Some(fp) => {
            let fp: Fingerprint = fp.parse()?;
            let definition = store
                .definition(&fp)?
                .ok_or_else(|| anyhow::anyhow!("No benchmark recorded with fingerprint {fp}"))?;
            let records = store.results_for(&fp)?;
            print!("{}", executor::format_history(&definition, &records));
        }
    }
    Ok(())
}

fn init_config(force: bool) -> anyhow::Result<()> {
    let path = PathBuf::from(CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(&path, BenchyConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}
