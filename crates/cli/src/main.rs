use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use expander_core::{CandidateCategory, ExpandOptions};
use expander_engine::{ExpansionExecutor, HandlerRegistry};
use expander_session::{EventFilter, SessionEvent};
use expander_workers::{
    AnalysisOutput, PatternPerf, PatternSpec, WorkerPool, WorkerPoolConfig,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

mod sim;

use sim::{Rng, SimulatedHandler, SimulatedTree};

#[derive(Parser)]
#[command(name = "expander")]
#[command(about = "Adaptive discovery and expansion scheduling engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full expansion against a simulated tree and print the stats
    Run(RunArgs),

    /// Exercise the analysis worker pool and print its report
    Workers(WorkersArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Number of candidates seeded into the simulated tree
    #[arg(long, default_value_t = 50)]
    nodes: usize,

    /// Seed for the deterministic simulation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Probability that a reveal fails transiently
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Probability that a reveal reports an interruption
    #[arg(long, default_value_t = 0.0)]
    cancel_rate: f64,

    /// Simulated per-reveal latency in milliseconds
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// Candidates processed per batch
    #[arg(long, default_value_t = 3)]
    batch_size: usize,

    /// Cap on total candidates attempted
    #[arg(long)]
    max_elements: Option<usize>,

    /// Wall-clock budget for the run in seconds
    #[arg(long)]
    max_time_secs: Option<u64>,

    /// Rate limiter floor in milliseconds
    #[arg(long, default_value_t = 10)]
    base_delay_ms: u64,

    /// Rate limiter ceiling in milliseconds
    #[arg(long, default_value_t = 500)]
    max_delay_ms: u64,

    /// Restrict the run to these categories (comma separated)
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,
}

#[derive(Args)]
struct WorkersArgs {
    /// Number of worker threads (0 forces in-process fallback)
    #[arg(long)]
    workers: Option<usize>,

    /// Per-task deadline in milliseconds
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// File to analyze instead of the built-in sample
    #[arg(long)]
    file: Option<std::path::PathBuf>,
}

fn parse_category(name: &str) -> Result<CandidateCategory> {
    CandidateCategory::ALL
        .into_iter()
        .find(|c| c.as_str() == name)
        .ok_or_else(|| {
            let known: Vec<&str> = CandidateCategory::ALL.iter().map(|c| c.as_str()).collect();
            anyhow!("unknown category '{name}' (known: {})", known.join(", "))
        })
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let mut options = ExpandOptions {
        batch_size: args.batch_size,
        base_delay: Duration::from_millis(args.base_delay_ms),
        max_delay: Duration::from_millis(args.max_delay_ms),
        ..ExpandOptions::default()
    };
    if let Some(cap) = args.max_elements {
        options.max_elements = cap;
    }
    if let Some(secs) = args.max_time_secs {
        options.max_time = Duration::from_secs(secs);
    }
    if !args.categories.is_empty() {
        let parsed: Result<Vec<_>> = args.categories.iter().map(|s| parse_category(s)).collect();
        options = options.with_categories(parsed?);
    }

    let mut rng = Rng::new(args.seed);
    let tree = Arc::new(SimulatedTree::new(args.nodes, &mut rng));
    let handler = Arc::new(SimulatedHandler::new(
        args.seed.wrapping_add(1),
        args.failure_rate,
        args.cancel_rate,
        Duration::from_millis(args.latency_ms),
    ));

    let mut handlers = HandlerRegistry::new();
    for category in CandidateCategory::ALL {
        handlers.insert(category, handler.clone());
    }

    let executor = ExpansionExecutor::new(tree, handlers);
    executor.subscribe(EventFilter::StatusChanged, |event| {
        if let SessionEvent::StatusChanged { from, to } = event {
            log::info!("session {from} -> {to}");
        }
    });

    let stats = executor.run(options).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

const SAMPLE: &str = "\
root comment
  reply one
    [+] 3 more replies
  reply two
continue this thread
load more comments
";

#[derive(Serialize)]
struct TaskReport {
    kind: &'static str,
    fallback: bool,
    duration_ms: u128,
    result: expander_workers::AnalysisResult,
}

impl TaskReport {
    fn new(kind: &'static str, output: AnalysisOutput) -> Self {
        Self {
            kind,
            fallback: output.fallback,
            duration_ms: output.duration.as_millis(),
            result: output.result,
        }
    }
}

async fn cmd_workers(args: WorkersArgs) -> Result<()> {
    let content = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => SAMPLE.to_string(),
    };

    let mut config = WorkerPoolConfig {
        task_timeout: Duration::from_millis(args.timeout_ms),
        ..WorkerPoolConfig::default()
    };
    if let Some(n) = args.workers {
        config.max_workers = n;
    }
    let pool = WorkerPool::new(config);

    let patterns = vec![
        PatternSpec {
            category: CandidateCategory::Collapsed,
            pattern: r"\[\+\]".to_string(),
        },
        PatternSpec {
            category: CandidateCategory::MoreComments,
            pattern: r"load more comments".to_string(),
        },
        PatternSpec {
            category: CandidateCategory::ContinueThread,
            pattern: r"continue this thread".to_string(),
        },
    ];
    let perf = vec![
        PatternPerf {
            pattern: r"\[\+\]".to_string(),
            hits: 128,
            avg_latency_ms: 0.4,
        },
        PatternPerf {
            pattern: r"load more comments".to_string(),
            hits: 16,
            avg_latency_ms: 1.2,
        },
    ];

    let mut reports = Vec::new();
    reports.push(TaskReport::new(
        "analyze_structure",
        pool.analyze_structure(content.clone()).await?,
    ));
    reports.push(TaskReport::new(
        "parse_candidates",
        pool.parse_candidates(content, patterns.clone()).await?,
    ));
    reports.push(TaskReport::new(
        "optimize_patterns",
        pool.optimize_patterns(patterns, perf).await?,
    ));

    #[derive(Serialize)]
    struct WorkersReport {
        tasks: Vec<TaskReport>,
        stats: expander_workers::WorkerStats,
        health: expander_workers::HealthReport,
    }

    let report = WorkersReport {
        stats: pool.get_stats(),
        health: pool.health_check().await,
        tasks: reports,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    pool.destroy().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Workers(args) => cmd_workers(args).await,
    }
}
