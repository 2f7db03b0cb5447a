//! taskfan - fan a task list out over a queue, fan results in through a ledger.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use taskfan_core::WorkerId;
use taskfan_worker::executor::{JOB_ID_ENV, TASK_ID_ENV};
use taskfan_worker::{
    commands, json_output, Backends, Config, JobFile, ProcessRunner, WorkSummary,
};

/// Resumable task distribution over a durable queue and a status ledger
#[derive(Parser)]
#[command(name = "taskfan")]
#[command(about = "Fan a task list out to workers and track completion", long_about = None)]
struct Cli {
    /// Print machine-readable JSON events on stdout. Task output is sent to
    /// stderr so stdout carries nothing but events.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a job file
    Validate {
        /// Path to the job file
        #[arg(short, long)]
        job_file: PathBuf,
    },

    /// Provision the queue and ledger on AWS and enqueue unfinished tasks
    Prepare(PrepareArgs),

    /// Consume the job's SQS queue until it drains
    Work(WorkArgs),

    /// Show the ledger status of every task in a job file
    Status(StatusArgs),

    /// Prepare, work and report in one process, with in-memory backends
    Run(RunArgs),
}

/// Overrides for values otherwise taken from `TASKFAN_*` variables and defaults.
#[derive(Args)]
struct Tuning {
    /// Message lease in seconds
    #[arg(long)]
    lease_secs: Option<u64>,

    /// Pause between receives while other workers hold messages
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Tasks per queue send (1-10)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batches in flight while enqueueing
    #[arg(long)]
    send_concurrency: Option<usize>,

    /// Worker identity recorded in the ledger
    #[arg(long)]
    worker_id: Option<String>,
}

impl Tuning {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(lease_secs) = self.lease_secs {
            config.lease_secs = lease_secs;
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.poll_interval_ms = poll_interval_ms;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(send_concurrency) = self.send_concurrency {
            config.send_concurrency = send_concurrency;
        }
        if let Some(worker_id) = &self.worker_id {
            config.worker_id = WorkerId::new(worker_id.clone());
        }
        config
    }
}

#[derive(Args)]
struct PrepareArgs {
    /// Path to the job file
    #[arg(short, long)]
    job_file: PathBuf,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Args)]
struct WorkArgs {
    /// Path to the job file
    #[arg(short, long)]
    job_file: PathBuf,

    /// Number of worker loops to run side by side
    #[arg(short, long, default_value = "1")]
    workers: usize,

    #[command(flatten)]
    tuning: Tuning,

    /// Command run for every task; the task id is appended as its last argument
    #[arg(last = true, required = true)]
    executor: Vec<String>,
}

#[derive(Args)]
struct StatusArgs {
    /// Path to the job file
    #[arg(short, long)]
    job_file: PathBuf,

    /// Write the report as JSON to this file
    #[arg(long)]
    out_file: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the job file
    #[arg(short, long)]
    job_file: PathBuf,

    /// Number of worker loops to run side by side
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Write the final status report as JSON to this file
    #[arg(long)]
    out_file: Option<PathBuf>,

    #[command(flatten)]
    tuning: Tuning,

    /// Command run for every task; the task id is appended as its last argument
    #[arg(last = true, required = true)]
    executor: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries reports and JSON events.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.json {
        json_output::enable_json_mode();
    }

    match cli.command {
        Commands::Validate { job_file } => validate(job_file).await,
        Commands::Prepare(args) => prepare(args).await,
        Commands::Work(args) => work(args).await,
        Commands::Status(args) => status(args).await,
        Commands::Run(args) => run(args).await,
    }
}

/// Build the task runner, keeping stdout clean for JSON events when asked to.
fn task_runner(executor: &[String]) -> Result<Arc<ProcessRunner>, Box<dyn std::error::Error>> {
    let runner = ProcessRunner::from_command(executor)?;
    let runner = if json_output::is_json_mode() {
        runner.with_stdout_to_stderr()
    } else {
        runner
    };
    Ok(Arc::new(runner))
}

fn exit_code(summary: &WorkSummary) -> ExitCode {
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        error!(failed = summary.failed, "Some tasks failed");
        ExitCode::FAILURE
    }
}

async fn validate(path: PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let job = JobFile::load(&path).await?;
    if !json_output::is_json_mode() {
        println!("Job file is valid:");
        println!("  List ID:  {}", job.list.id);
        if !job.list.display_name.is_empty() {
            println!("  Name:     {}", job.list.display_name);
        }
        println!("  Tasks:    {}", job.list.len());
    }
    Ok(ExitCode::SUCCESS)
}

async fn prepare(args: PrepareArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = args.tuning.apply(Config::from_env());
    config.validate()?;
    let job = JobFile::load(&args.job_file).await?;
    info!(list_id = %job.list.id, tasks = job.list.len(), "Preparing job file");

    let backends = Backends::aws().await;
    let prepared = commands::prepare(&backends, &config, &job).await?;
    if !json_output::is_json_mode() {
        println!("{}", prepared);
    }
    Ok(ExitCode::SUCCESS)
}

async fn work(args: WorkArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = args.tuning.apply(Config::from_env());
    config.validate()?;
    let job = JobFile::load(&args.job_file).await?;
    let runner = task_runner(&args.executor)?;

    info!(
        list_id = %job.list.id,
        workers = args.workers,
        worker_id = %config.worker_id,
        "Starting workers (tasks see {} and {})",
        TASK_ID_ENV,
        JOB_ID_ENV
    );

    let backends = Backends::aws().await;
    let summary = commands::work(&backends, &config, &job.list.id, runner, args.workers).await?;
    if !json_output::is_json_mode() {
        println!();
        println!("{}", summary);
    }
    Ok(exit_code(&summary))
}

async fn status(args: StatusArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::from_env();
    config.validate()?;
    let job = JobFile::load(&args.job_file).await?;

    let backends = Backends::aws().await;
    let report =
        commands::status(&backends, &config, &job.list, args.out_file.as_deref()).await?;
    if !json_output::is_json_mode() {
        print!("{}", report.render_table());
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(args: RunArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = args.tuning.apply(Config::from_env());
    config.validate()?;
    let job = JobFile::load(&args.job_file).await?;
    let runner = task_runner(&args.executor)?;

    info!(
        list_id = %job.list.id,
        tasks = job.list.len(),
        workers = args.workers,
        worker_id = %config.worker_id,
        "Starting taskfan run (tasks see {} and {})",
        TASK_ID_ENV,
        JOB_ID_ENV
    );

    let backends = Backends::in_memory();

    let prepared = commands::prepare(&backends, &config, &job).await?;
    if !json_output::is_json_mode() {
        println!("{}\n", prepared);
    }

    let summary = commands::work(&backends, &config, &job.list.id, runner, args.workers).await?;

    let report =
        commands::status(&backends, &config, &job.list, args.out_file.as_deref()).await?;
    if !json_output::is_json_mode() {
        print!("{}", report.render_table());
        println!();
        println!("{}", summary);
    }

    Ok(exit_code(&summary))
}
