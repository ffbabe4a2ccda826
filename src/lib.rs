#![deny(missing_docs)]

//! This crate reads telemetry from an ESC bridge attached over a serial port.
//!
//! The device prints comma separated lines.
//! Lines containing `ts_ms` name the columns of the lines that follow.
//! Every other line is a data record: it is written to a CSV session file
//! and published to live subscribers.
//!
//! Subscribers connect to the `/telemetry` websocket and receive one JSON
//! object per record, keyed by column name.

/// Column schemas and the records they shape.
pub mod telemetry;

/// Classifies device lines as headers or data.
pub mod parser;

/// Serial transport plumbing.
pub mod serial;

/// Finds and opens the serial device.
pub mod port;

/// Per-run CSV session files.
pub mod session;

/// Where records go after being logged.
pub mod sink;

/// The ingestion run itself.
pub mod ingest;

/// Starts and stops ingestion runs.
pub mod control;

/// Mocked serial devices.
pub mod mock;

/// Code relating to setting up the live telemetry server.
pub mod server;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Relates to config files.
pub mod config;

/// The command line interface.
pub mod cli;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
