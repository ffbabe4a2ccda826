use clap::Parser;
use color_eyre::Result;
use esc_telemetry::{
    cli,
    config::Config,
    control::TelemetryControl,
    logging,
    port::SystemPorts,
    server,
    sink::BroadcastSink,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info, Level};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    hangup.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    futures::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(
        Level::INFO,
        cli.log_dir.clone().map(|dir| (Level::DEBUG, dir)),
    );

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);

    let sink = BroadcastSink::new(config.broadcast_capacity);
    let mut control = TelemetryControl::new(
        SystemPorts::new(config.read_timeout()),
        sink.clone(),
        config.clone(),
    );
    control.start_from_config();

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        _ = hangup() => {
            info!("Told to hang up, quitting");
            Ok(())
        }
        result = server::run_on_port(config.server.clone(), sink) => {
            error!("Server returned");
            match result {
                Ok(()) => Err(color_eyre::eyre::eyre!("Server stopped unexpectedly")),
                Err(e) => Err(e.into()),
            }
        }
    };

    if let Some(summary) = control.stop().await {
        info!(
            state = %summary.state,
            records = summary.stats.records,
            read_errors = summary.stats.read_errors,
            "Ingestion ended"
        );
        if let Some(session) = summary.session {
            info!("Session saved to {}", session.display());
        }
    }

    outcome
}
