use std::path::PathBuf;

use clap::{Parser, Subcommand};
use itertools::Itertools;

use crate::{
    config::Config,
    port::{PortBackend, SystemPorts},
};

/// The command line interface for ESC telemetry.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The serial device to try first
    #[arg(long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Directory for session CSV files
    #[arg(long)]
    pub sessions: Option<PathBuf>,

    /// Address the telemetry server binds
    #[arg(long)]
    pub host: Option<String>,

    /// Port the telemetry server binds
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Command line values win over the ones in `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(sessions) = &self.sessions {
            config.sessions_dir = sessions.clone();
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(http_port) = self.http_port {
            config.server.port = http_port;
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),

    /// List the serial devices on this host.
    ListPorts,
}

/// Helpful examples for users.
#[derive(Subcommand, Clone, Debug)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Run a subcommand to completion.
pub fn handle_command(command: Commands) -> Result<(), crate::error::Error> {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty());
        }
        Commands::ListPorts => {
            let ports = SystemPorts::default().available()?;

            if ports.is_empty() {
                println!("No serial ports found");
            } else {
                println!(
                    "{}",
                    ports
                        .iter()
                        .map(|port| {
                            let marker = if port.looks_known() { "*" } else { " " };
                            format!("{marker} {port}")
                        })
                        .join("\n")
                );

                let pick = ports
                    .iter()
                    .find(|port| port.looks_known())
                    .or_else(|| ports.first());
                if let Some(pick) = pick {
                    println!("Without --port or SERIAL_PORT, {} would be used", pick.path);
                }
            }
        }
    }

    Ok(())
}
