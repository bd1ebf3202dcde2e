use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::info;

use jobrunner_core::ServiceConfig;
use jobrunner_runner::{Dispatcher, EnvSecretSource, RunnerDaemon, SecretSource};

/// Job dispatch daemon for the jobrunner service.
#[derive(Parser, Debug)]
#[command(name = "jobrunnerd", about = "Dispatches job batches to the execution endpoint")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long = "config-file", value_name = "PATH")]
    config_file: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Arc::new(ServiceConfig::load(&cli.config_file)?);

    let secret = EnvSecretSource
        .signing_secret(&config.dispatch.secret_project)
        .await?;
    let dispatcher = Arc::new(Dispatcher::new(&config.dispatch, secret)?);

    let mut daemon = RunnerDaemon::new(config, dispatcher)?;
    let shutdown = spawn_signal_listener()?;

    daemon.run(shutdown).await;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

/// Install SIGHUP/SIGINT/SIGTERM handlers; the returned receiver flips to
/// `true` when any of them fires.
fn spawn_signal_listener() -> std::io::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = hangup.recv() => info!("received SIGHUP"),
            _ = interrupt.recv() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
        let _ = tx.send(true);
    });

    Ok(rx)
}
