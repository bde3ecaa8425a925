mod app;
mod auth;
mod catalog;
mod config;
mod error;
mod network;
mod reporter;
mod switch;
mod verify;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::auth::NmPermissionGate;
use crate::config::{CliArgs, Command, Config};
use crate::network::binding::ProcessBinding;
use crate::network::NetworkManager;
use crate::reporter::{ReportEvent, StatusReporter};
use crate::switch::SwitchState;
use crate::verify::VerificationRunner;

type NmApp = App<NetworkManager, NmPermissionGate>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    color_eyre::install()?;

    if let Command::PrintDefaultConfig = cli.command {
        print!("{}", config::default_config_toml());
        return Ok(());
    }

    let config = config::load(&cli)?;
    let _log_guard = init_logging(&config)?;

    info!("nexus-hop starting");

    // Connect to NetworkManager
    let binding = ProcessBinding::new();
    let nm = match NetworkManager::new(config.interface().map(String::from), binding.clone()).await
    {
        Ok(nm) => Arc::new(nm),
        Err(e) => {
            eprintln!("Failed to connect to NetworkManager D-Bus: {}", e);
            eprintln!("Is NetworkManager running? Try: systemctl status NetworkManager");
            std::process::exit(1);
        }
    };

    if !nm.is_running().await {
        eprintln!("NetworkManager is not running.");
        eprintln!("Start it with: sudo systemctl start NetworkManager");
        std::process::exit(1);
    }

    info!(
        "Connected to NetworkManager v{}",
        nm.version().await.unwrap_or_default()
    );

    let gate = Arc::new(NmPermissionGate::new(nm.connection().clone()));
    let (reporter, _reporter_task) = StatusReporter::spawn();
    let printer = (!wants_json(&cli.command)).then(|| spawn_printer(reporter.subscribe()));
    let verifier = VerificationRunner::new(binding, config.request_timeout());
    let app = App::new(nm, gate, reporter, config.switch_settings(), verifier);

    let result = run(&app, &config, cli.command).await;

    // Flush the reporter, then let the printer drain once every handle is gone
    app.reporter().snapshot().await;
    app.shutdown();
    drop(app);
    if let Some(printer) = printer {
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    }

    info!("nexus-hop exiting");
    result
}

async fn run(app: &NmApp, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Switch { ssid, url, json, .. } => {
            let url = url
                .or_else(|| config.default_url().map(String::from))
                .unwrap_or_default();
            // Connectivity changes refresh the status line for the whole switch
            let _watcher = app.watch_connectivity().await?;
            let _states = spawn_state_logger(app.subscribe_switch_state());

            let attempt = app.switch_and_verify(&ssid, &url).await?;
            info!("Switch to {} finished: {:?}", ssid, attempt.outcome);
            if json {
                println!("{}", serde_json::to_string_pretty(&attempt)?);
            }
            if !attempt.outcome.is_bound() {
                return Err(eyre!("switch to {} did not complete", ssid));
            }
            if let Some(failed) = attempt.verification.filter(|v| !v.is_success()) {
                return Err(eyre!(
                    "verification of {} failed: {}",
                    failed.requested_url,
                    failed.error.unwrap_or_default()
                ));
            }
        }
        Command::Status => {
            if app.refresh_status().await.is_none() {
                println!("No WiFi connection status available");
            }
        }
        Command::List { json } => {
            let profiles = app.known_networks().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else if profiles.is_empty() {
                println!("No saved WiFi networks");
            } else {
                for profile in &profiles {
                    println!("{:<32} {}", profile.display_name, profile.handle);
                }
            }
        }
        Command::Watch => {
            app.refresh_status().await;
            let _watcher = app.watch_connectivity().await?;
            info!("Watching connectivity changes");
            tokio::signal::ctrl_c()
                .await
                .wrap_err("Failed to listen for Ctrl-C")?;
        }
        Command::PrintDefaultConfig => print!("{}", crate::config::default_config_toml()),
    }
    Ok(())
}

fn wants_json(command: &Command) -> bool {
    matches!(
        command,
        Command::Switch { json: true, .. } | Command::List { json: true }
    )
}

/// Trace every switch state transition; aborted with the returned handle
fn spawn_state_logger(mut states: watch::Receiver<SwitchState>) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            debug!("Switch state: {:?}", state);
        }
    }))
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Print reporter output with a wall-clock prefix until the reporter shuts down
fn spawn_printer(mut events: broadcast::Receiver<ReportEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let line = match events.recv().await {
                Ok(ReportEvent::Line(line)) => line,
                Ok(ReportEvent::CurrentNetwork(name)) => format!("Current network: {name}"),
                Ok(ReportEvent::Cleared) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Printer skipped {} status events", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            println!("[{}] {}", Local::now().format("%H:%M:%S"), line);
        }
    })
}

/// Initialize tracing to the configured log file, or stderr
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let Some(path) = config.log_file() else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}
