use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden::config::ProcessSpec;
use warden::process::{Supervisor, SupervisorOptions};

/// Warden - supervises the processes described by a spec file
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the process spec file (.toml or .json)
    spec_file: PathBuf,

    /// Directory for captured process output
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let specs = ProcessSpec::from_file(&args.spec_file)
        .with_context(|| format!("failed to load {}", args.spec_file.display()))?;

    let mut options = SupervisorOptions::default();
    if let Some(log_dir) = args.log_dir {
        options.log_dir = log_dir;
    }
    info!(log_dir = %options.log_dir.display(), "starting supervisor");

    let handle = Supervisor::start(options)
        .await
        .context("failed to start supervisor")?;

    let mut started = 0usize;
    for spec in specs {
        let name = spec.name.clone();
        match handle.start(spec).await {
            Ok(ids) => {
                info!(group = %name, instances = ids.len(), "group started");
                started += 1;
            }
            Err(e) => {
                error!(group = %name, "failed to start group: {}", e);
            }
        }
    }

    if started == 0 {
        handle.shutdown().await.ok();
        anyhow::bail!("no process group could be started");
    }

    wait_for_shutdown_signal().await;

    info!("signal received, shutting down");
    handle
        .shutdown()
        .await
        .context("supervisor shutdown failed")?;

    Ok(())
}

/// Block until SIGINT or SIGTERM arrives
async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
