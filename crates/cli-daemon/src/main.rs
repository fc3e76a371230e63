//! CLI entry point for the audio compression queue
//!
//! `run` batch-compresses a directory through the queue, `status` prints the
//! persisted job table and `serve` keeps the queue running behind the status
//! HTTP server until Ctrl-C.

use audio_queue::{
    run_startup_checks, run_status_server, submit_batch, BatchRequest, CompressionJob, Config,
    FfmpegExecutor, JobPriority, JobQueue, JobStatus, JobStore, QueueStats,
};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Persistent priority queue for audio compression jobs
#[derive(Parser, Debug)]
#[command(name = "audioq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress every audio file in a directory and wait for the queue to drain
    Run(RunArgs),
    /// Print the persisted job table
    Status {
        /// Also list every job
        #[arg(long)]
        jobs: bool,
    },
    /// Run the queue and the status HTTP server until Ctrl-C
    Serve {
        /// Address to bind, overriding [server] bind
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Skip the FFmpeg startup check. For testing only.
        #[arg(long)]
        skip_checks: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory containing the input audio files
    #[arg(short, long)]
    input: PathBuf,

    /// Directory receiving optimised-<bitrate>kbps subdirectories
    #[arg(short, long)]
    output: PathBuf,

    /// Target bitrates in kbps
    #[arg(short, long, value_delimiter = ',', default_value = "64")]
    bitrates: Vec<u32>,

    /// Output format: mp3, aac, ogg, opus or flac
    #[arg(short, long, default_value = "mp3")]
    format: String,

    /// Priority: low, normal, high, urgent (or 1-4)
    #[arg(short, long, default_value = "normal")]
    priority: JobPriority,

    /// Output channel count
    #[arg(long, default_value_t = 1)]
    channels: u32,

    /// FFmpeg audio filter chain
    #[arg(long)]
    filter: Option<String>,

    /// Drop input metadata
    #[arg(long)]
    no_metadata: bool,

    /// Job id prefix and preset name
    #[arg(long)]
    prefix: Option<String>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 24 * 60 * 60)]
    wait_secs: u64,

    /// Skip the FFmpeg startup check. For testing only.
    #[arg(long)]
    skip_checks: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Config file plus environment overrides, or defaults plus overrides when
/// the file does not exist.
fn load_config(path: &Path) -> Result<Config, String> {
    if path.exists() {
        return Config::load(path).map_err(|e| format!("{}: {}", path.display(), e));
    }
    info!(path = %path.display(), "config file not found, using defaults");
    let mut cfg = Config::default();
    cfg.apply_env_overrides();
    Ok(cfg)
}

fn build_queue(cfg: &Config) -> JobQueue {
    JobQueue::from_config(cfg, FfmpegExecutor::new(&cfg.ffmpeg))
}

fn print_stats(stats: &QueueStats) {
    println!(
        "total={} pending={} running={} completed={} failed={} cancelled={}",
        stats.total, stats.pending, stats.running, stats.completed, stats.failed, stats.cancelled
    );
}

fn print_job(job: &CompressionJob) {
    println!(
        "{:<32} {:<9} {:<7} {:>5.1}% {}",
        job.job_id,
        job.status,
        job.priority,
        job.progress,
        job.error_message.as_deref().unwrap_or(""),
    );
}

async fn cmd_run(cfg: Config, args: RunArgs) -> ExitCode {
    if !args.skip_checks {
        if let Err(e) = run_startup_checks(&cfg) {
            error!(error = %e, "startup check failed");
            return ExitCode::FAILURE;
        }
    }

    let queue = Arc::new(build_queue(&cfg));
    queue.start().await;

    let shutdown = CancellationToken::new();
    if cfg.server.enabled {
        match cfg.server.bind.parse::<SocketAddr>() {
            Ok(addr) => {
                let server = run_status_server(queue.clone(), addr, shutdown.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.await {
                        error!(error = %e, "status server error");
                    }
                });
            }
            Err(e) => warn!(bind = %cfg.server.bind, error = %e, "invalid server bind address, status server disabled"),
        }
    }

    let request = BatchRequest {
        input_dir: args.input,
        output_dir: args.output,
        bitrates: args.bitrates,
        format: args.format,
        priority: args.priority,
        channels: args.channels,
        filter_chain: args.filter,
        preserve_metadata: !args.no_metadata,
        prefix: args.prefix,
    };

    let report = match submit_batch(&queue, &request) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "batch submission failed");
            shutdown.cancel();
            queue.stop().await;
            return ExitCode::FAILURE;
        }
    };
    println!("Submitted {} jobs", report.accepted.len());
    for (job_id, reason) in &report.rejected {
        println!("Rejected {}: {}", job_id, reason);
    }

    let drained = queue.wait_idle(Duration::from_secs(args.wait_secs)).await;
    if !drained {
        warn!(wait_secs = args.wait_secs, "queue did not drain in time");
    }
    shutdown.cancel();
    queue.stop().await;

    print_stats(&queue.stats());
    let failed: Vec<CompressionJob> = queue
        .list_by_status(JobStatus::Failed)
        .into_iter()
        .filter(|job| report.accepted.contains(&job.job_id))
        .collect();
    for job in &failed {
        print_job(job);
    }

    if drained && failed.is_empty() && report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_status(cfg: &Config, list_jobs: bool) -> ExitCode {
    let store = JobStore::new(&cfg.queue.persist_file);
    let table = match store.load() {
        Ok(table) => table,
        Err(e) => {
            error!(error = %e, "failed to read job file");
            return ExitCode::FAILURE;
        }
    };

    print_stats(&QueueStats::from_jobs(table.values()));
    if list_jobs {
        let mut jobs: Vec<&CompressionJob> = table.values().collect();
        jobs.sort_by_key(|j| j.created_at);
        for job in jobs {
            print_job(job);
        }
    }
    ExitCode::SUCCESS
}

async fn cmd_serve(cfg: Config, bind: Option<SocketAddr>, skip_checks: bool) -> ExitCode {
    if !skip_checks {
        if let Err(e) = run_startup_checks(&cfg) {
            error!(error = %e, "startup check failed");
            return ExitCode::FAILURE;
        }
    }

    let addr = match bind {
        Some(addr) => addr,
        None => match cfg.server.bind.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                error!(bind = %cfg.server.bind, error = %e, "invalid server bind address");
                return ExitCode::FAILURE;
            }
        },
    };

    let queue = Arc::new(build_queue(&cfg));
    queue.start().await;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        }
        signal_token.cancel();
    });

    let code = match run_status_server(queue.clone(), addr, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "status server error");
            ExitCode::FAILURE
        }
    };

    queue.stop().await;
    code
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Run(args) => cmd_run(cfg, args).await,
        Command::Status { jobs } => cmd_status(&cfg, jobs),
        Command::Serve { bind, skip_checks } => cmd_serve(cfg, bind, skip_checks).await,
    }
}
