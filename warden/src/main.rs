//! Warden daemon: runs a systemd unit on whichever host holds an etcd lease.
//!
//! Exit codes:
//! - 0: help, version, `--dry-run`, or clean shutdown after SIGINT/SIGTERM
//! - 1: configuration error
//! - 2: cannot reach systemd or build the etcd client

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_core::ServiceSupervisor;
use warden_etcd::EtcdClient;
use warden_leader::{ElectionController, ElectionStats};
use warden_systemd::{SystemctlConfig, SystemctlSupervisor};

mod cli;

use cli::{Cli, Settings};

/// Exit code for bad arguments, environment values or host identity.
const CONFIG_ERROR_EXIT_CODE: u8 = 1;

/// Exit code when a collaborator cannot be reached at startup.
const BOOTSTRAP_ERROR_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are reported as errors that go to stdout
            let code = if e.use_stderr() {
                CONFIG_ERROR_EXIT_CODE
            } else {
                0
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let settings = match cli.resolve() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(CONFIG_ERROR_EXIT_CODE);
        }
    };

    init_logging(settings.log_json);

    if settings.dry_run {
        return match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::from(CONFIG_ERROR_EXIT_CODE)
            }
        };
    }

    info!(
        settings = %serde_json::to_string(&settings).unwrap_or_default(),
        "Starting with configuration"
    );

    match run(settings).await {
        Ok(stats) => {
            info!(
                stats = %serde_json::to_string(&stats).unwrap_or_default(),
                "Shut down cleanly"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(BOOTSTRAP_ERROR_EXIT_CODE)
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Connect the collaborators and run the election until a signal arrives.
async fn run(settings: Settings) -> anyhow::Result<ElectionStats> {
    let controller = bootstrap(&settings).await?;

    let shutdown = CancellationToken::new();
    listen_for_signals(shutdown.clone())?;

    let controller = controller.with_shutdown_token(shutdown);
    tokio::spawn(controller.run())
        .await
        .context("Election controller terminated abnormally")
}

async fn bootstrap(settings: &Settings) -> anyhow::Result<ElectionController> {
    let systemctl = if settings.user_mode {
        SystemctlConfig::user()
    } else {
        SystemctlConfig::default()
    };
    let supervisor = SystemctlSupervisor::connect(systemctl)
        .await
        .context("Cannot connect to systemd")?;

    // Fail now rather than on the first acquisition
    let election = &settings.election;
    let probe = supervisor
        .subscribe_unit_changes(&election.unit_name, election.poll_interval)
        .await
        .with_context(|| format!("Cannot subscribe to changes of {}", election.unit_name))?;
    drop(probe);

    let etcd = settings.etcd_config().context("Invalid etcd endpoints")?;
    let client = EtcdClient::new(etcd).context("Cannot build etcd client")?;
    info!(endpoint = %client.current_endpoint(), "Using etcd");

    let controller =
        ElectionController::new(election.clone(), Arc::new(client), Arc::new(supervisor))
            .context("Cannot set up the election")?;
    Ok(controller)
}

#[cfg(unix)]
fn listen_for_signals(shutdown: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Cannot install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Cannot install SIGTERM handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!(signal = name, "Shutting down");
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_signals(shutdown: CancellationToken) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shutdown.cancel();
        }
    });
    Ok(())
}
