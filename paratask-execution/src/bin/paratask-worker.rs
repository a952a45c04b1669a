//! Worker process entry point
//!
//! Reads a single `execute_payload` request from stdin, runs the staged
//! task and writes its outcome to stdout. Diagnostics go to stderr.

use anyhow::Context;
use clap::Parser;
use paratask_ipc::StdioTransport;
use paratask_js::run_worker_process;
use paratask_logging::init_worker_tracing;

#[derive(Parser, Debug)]
#[command(name = "paratask-worker")]
#[command(about = "Runs one paratask task per process")]
#[command(version)]
struct Args {
    /// Identifier used in log output
    #[arg(long)]
    worker_id: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_worker_tracing(&args.log_level, args.worker_id.as_deref())
        .context("Failed to initialize logging")?;

    let (reader, writer) = StdioTransport::stdio().into_split();
    run_worker_process(reader, writer)
        .await
        .context("Worker failed")?;

    Ok(())
}
