//! Taskwire worker binary
//!
//! Serves module invocations over stdio until the supervising channel closes
//! the pipe. The stock binary carries an empty registry; applications that
//! need their own modules embed `taskwire_runtime` and build their own worker
//! binary around it.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskwire_runtime::{worker_main, ModuleRegistry};

#[derive(Debug, Parser)]
#[command(name = "taskwire-worker", version)]
struct Args {
    /// Marker flag set by the supervising channel when re-execing the host
    /// binary in worker mode.
    #[arg(long)]
    worker: bool,

    /// Identifier assigned by the supervising channel, echoed in logs.
    #[arg(long, default_value = "worker-0")]
    worker_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Stdout carries the protocol; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("starting {}", args.worker_id);

    worker_main(ModuleRegistry::new()).await?;
    Ok(())
}
