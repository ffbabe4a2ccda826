use std::io;

use thiserror::Error;

/// Errors thay may occur in this library.
///
/// Each failure category of the ingestion pipeline has its own variant.
/// Only resolving and opening a device ([`Error::NoPortFound`], [`Error::ListPorts`],
/// [`Error::Open`]) end an ingestion run.
#[derive(Debug, Error)]
pub enum Error {
    /// No serial device could be resolved.
    #[error("No usable serial port was found")]
    NoPortFound,

    /// The host's serial devices could not be listed.
    #[error("Could not list serial ports: {0}")]
    ListPorts(String),

    /// A serial device exists (or was asked for) but could not be opened.
    #[error("Could not open serial port `{path}`, problem: {problem}")]
    Open {
        /// The device path.
        path: String,

        /// What went wrong.
        problem: String,
    },

    /// Reading from an open serial device failed.
    #[error("Serial read failed: {0}")]
    Read(#[source] io::Error),

    /// The session log file could not be created or written.
    #[error("Session log IO problem: {0}")]
    SessionLog(#[from] io::Error),

    /// A row could not be encoded into the session log.
    #[error("Session log CSV problem: {0}")]
    Csv(#[from] csv::Error),

    /// A header line carried no column names.
    #[error("A schema needs at least one named column")]
    EmptySchema,

    /// A record could not be handed to subscribers.
    #[error("Publishing failed: {0}")]
    Publish(String),

    /// The live telemetry server could not run.
    #[error("Server problem: {0}")]
    Server(String),

    /// The configuration is unusable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),
}

impl Error {
    /// Extract the configuration problem, if that is what this error is.
    pub fn try_into_bad_config(self) -> Option<String> {
        match self {
            Error::BadConfig(problem) => Some(problem),
            _ => None,
        }
    }
}
