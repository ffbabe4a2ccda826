//! The ingestion loop.
//!
//! One [`Ingestor`] owns the serial device, the session log and the schema for
//! one run. It resolves a port once, opens it, then reads lines until told to stop:
//!
//! ```text
//! Idle -> Resolving -> Running -> Stopped
//!                  \-> Failed
//! ```
//!
//! Failing to resolve or open a device ends the run without creating a session.
//! Everything after that (read errors, odd lines, log or publish failures) is
//! logged and the loop carries on.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncReadExt, sync::watch, task::JoinHandle};
use tokio_util::{codec::Decoder, sync::CancellationToken};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    config::Config,
    error::Error,
    parser::{LineParser, ParsedLine},
    port::{self, PortBackend, PortResolver},
    serial::{codecs::lines::LinesCodec, SerialLink},
    session::SessionLog,
    sink::PublishSink,
    telemetry::SchemaState,
};

/// Where an ingestion run is at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not started yet.
    Idle,

    /// Looking for a device.
    Resolving,

    /// Device open, reading lines.
    Running,

    /// No device could be resolved or opened. The run is over.
    Failed,

    /// Stopped on request. The run is over.
    Stopped,
}

impl ConnectionState {
    /// Is the run over?
    pub fn is_finished(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Stopped)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Running => "running",
            ConnectionState::Failed => "failed",
            ConnectionState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Counters describing a finished (or running) run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Non-empty lines seen.
    pub lines: usize,

    /// Header lines accepted as a new schema.
    pub headers: usize,

    /// Data lines turned into records.
    pub records: usize,

    /// Reads that failed.
    pub read_errors: usize,

    /// Lines dropped for exceeding the maximum line length.
    pub skipped_lines: usize,

    /// Rows that could not be written to the session log.
    pub log_failures: usize,

    /// Records the sink refused.
    pub publish_failures: usize,
}

/// What a run ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// The final state, [`ConnectionState::Failed`] or [`ConnectionState::Stopped`].
    pub state: ConnectionState,

    /// The device that was read, if one was opened.
    pub port: Option<String>,

    /// The session file, if one was created.
    pub session: Option<PathBuf>,

    /// See [`IngestStats`].
    pub stats: IngestStats,
}

/// Builder for an [`Ingestor`].
#[derive(Debug)]
pub struct IngestBuilder<B, S> {
    backend: Arc<B>,
    sink: Arc<S>,
    port: Option<String>,
    env_override: Option<Option<String>>,
    baud: u32,
    sessions_dir: PathBuf,
    header_marker: Option<String>,
    poll_interval: Duration,
    read_backoff: Duration,
    read_timeout: Duration,
    sample_lines: usize,
    max_line_length: usize,
}

impl<B: PortBackend, S: PublishSink> IngestBuilder<B, S> {
    /// Start a new builder reading from `backend` and publishing into `sink`.
    pub fn new(backend: Arc<B>, sink: Arc<S>) -> Self {
        let defaults = Config::default();

        Self {
            backend,
            sink,
            port: None,
            env_override: None,
            baud: defaults.baud,
            sessions_dir: defaults.sessions_dir.clone(),
            header_marker: None,
            poll_interval: defaults.poll_interval(),
            read_backoff: defaults.read_backoff(),
            read_timeout: defaults.read_timeout(),
            sample_lines: defaults.sample_lines,
            max_line_length: defaults.max_line_length,
        }
    }

    /// Take baud, sessions directory, timings and so on from a [`Config`].
    pub fn with_config(mut self, config: &Config) -> Self {
        self.port = config.port.clone();
        self.baud = config.baud;
        self.sessions_dir = config.sessions_dir.clone();
        self.header_marker = Some(config.header_marker.clone());
        self.poll_interval = config.poll_interval();
        self.read_backoff = config.read_backoff();
        self.read_timeout = config.read_timeout();
        self.sample_lines = config.sample_lines;
        self.max_line_length = config.max_line_length;
        self
    }

    /// The device to try first.
    pub fn set_port(mut self, port: Option<String>) -> Self {
        self.port = port;
        self
    }

    /// Use this instead of reading [`port::PORT_ENV_VAR`].
    pub fn set_env_override(mut self, env_override: Option<String>) -> Self {
        self.env_override = Some(env_override);
        self
    }

    /// Set the serial baud rate.
    /// Will use 115_200 if not set.
    pub fn set_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Where session files go.
    pub fn set_sessions_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.sessions_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the wait used when nothing was read, and after a failed read.
    pub fn set_intervals(mut self, poll_interval: Duration, read_backoff: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.read_backoff = read_backoff;
        self
    }

    /// Set the longest a single read may wait for data.
    pub fn set_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Lines longer than this many bytes are skipped.
    pub fn set_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Create the [`Ingestor`].
    /// If no environment override was set, [`port::PORT_ENV_VAR`] is read now.
    #[must_use]
    pub fn build(self) -> Ingestor<B, S> {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        let parser = match self.header_marker {
            Some(marker) => LineParser::new(marker),
            None => LineParser::default(),
        };

        Ingestor {
            backend: self.backend,
            sink: self.sink,
            port: self.port,
            env_override: self.env_override.unwrap_or_else(port::env_override),
            baud: self.baud,
            sessions_dir: self.sessions_dir,
            poll_interval: self.poll_interval,
            read_backoff: self.read_backoff,
            read_timeout: self.read_timeout,
            sample_lines: self.sample_lines,
            max_line_length: self.max_line_length,
            parser,
            schema: SchemaState::new(),
            stats: IngestStats::default(),
            state_tx,
            stop: CancellationToken::new(),
        }
    }
}

/// One ingestion run. See the [module docs](self).
#[derive(Debug)]
pub struct Ingestor<B, S> {
    backend: Arc<B>,
    sink: Arc<S>,
    port: Option<String>,
    env_override: Option<String>,
    baud: u32,
    sessions_dir: PathBuf,
    poll_interval: Duration,
    read_backoff: Duration,
    read_timeout: Duration,
    sample_lines: usize,
    max_line_length: usize,

    parser: LineParser,
    schema: SchemaState,
    stats: IngestStats,

    state_tx: watch::Sender<ConnectionState>,
    stop: CancellationToken,
}

impl<B: PortBackend, S: PublishSink> Ingestor<B, S> {
    /// Observe state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// A token which stops this run when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run on a new task.
    pub fn spawn(self) -> IngestHandle {
        let state = self.state();
        let stop = self.stop_token();
        let span = info_span!("ingest", port = ?self.port);

        let task = tokio::spawn(self.run().instrument(span));

        IngestHandle { state, stop, task }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "Ingestion state");
        self.state_tx.send_replace(state);
    }

    fn summary(
        &self,
        state: ConnectionState,
        port: Option<String>,
        session: Option<PathBuf>,
    ) -> IngestSummary {
        self.set_state(state);

        IngestSummary {
            state,
            port,
            session,
            stats: self.stats.clone(),
        }
    }

    /// Resolve and open a device, then ingest until stopped.
    pub async fn run(mut self) -> IngestSummary {
        self.set_state(ConnectionState::Resolving);

        let path = match self.resolve().await {
            Ok(path) => path,
            Err(e) => {
                error!("Could not resolve a serial port: {e}");
                return self.summary(ConnectionState::Failed, None, None);
            }
        };

        if self.stop.is_cancelled() {
            info!("Stopped before opening the serial port");
            return self.summary(ConnectionState::Stopped, None, None);
        }

        info!(%path, baud = self.baud, "Using serial port");

        let link = match self.backend.open(&path, self.baud) {
            Ok(link) => link,
            Err(e) => {
                error!("Error opening serial: {e}");
                return self.summary(ConnectionState::Failed, None, None);
            }
        };

        self.set_state(ConnectionState::Running);

        let mut session = match SessionLog::open(&self.sessions_dir) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(dir = ?self.sessions_dir, "Could not create session log, continuing without: {e}");
                None
            }
        };

        if let Some(session) = session.as_mut() {
            if let Err(e) = session.write_header(self.schema.current()) {
                warn!("Could not log header: {e}");
                self.stats.log_failures += 1;
            }
        }

        let session_path = session.as_ref().map(|session| session.path().to_path_buf());

        self.read_loop(link, &mut session).await;

        if let Some(mut session) = session {
            session.close();
        }

        info!(stats = ?self.stats, "Serial port closed");

        self.summary(ConnectionState::Stopped, Some(path), session_path)
    }

    async fn resolve(&self) -> Result<String, Error> {
        let backend = Arc::clone(&self.backend);
        let preferred = self.port.clone();
        let env_override = self.env_override.clone();

        // Probing and listing devices block.
        tokio::task::spawn_blocking(move || {
            PortResolver::new(backend.as_ref())
                .with_env_override(env_override)
                .resolve(preferred.as_deref())
        })
        .await
        .map_err(|e| Error::ListPorts(format!("Port resolution task failed: {e}")))?
    }

    /// Wait, unless stopped first.
    /// Returns false if stopped.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn read_loop<L: SerialLink>(&mut self, mut link: L, session: &mut Option<SessionLog>) {
        let mut codec =
            LinesCodec::new_with_max_length(b'\n', self.max_line_length).into_string_codec();
        let mut buf = BytesMut::with_capacity(1024);

        loop {
            let read = tokio::select! {
                _ = self.stop.cancelled() => break,
                read = tokio::time::timeout(self.read_timeout, link.read_buf(&mut buf)) => read,
            };

            match read {
                Err(_elapsed) => {
                    trace!("Nothing to read");
                    continue;
                }
                Ok(Ok(0)) => {
                    if !self.pause(self.poll_interval).await {
                        break;
                    }
                    continue;
                }
                Ok(Ok(n)) => trace!("Read {n} byte(s)"),
                Ok(Err(e)) => {
                    self.stats.read_errors += 1;
                    let e = Error::Read(e);
                    warn!(cause = ?e, "{e}, retrying");

                    if !self.pause(self.read_backoff).await {
                        break;
                    }
                    continue;
                }
            }

            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(line)) => self.handle_line(&line, session),
                    Ok(None) => break,
                    Err(e) => {
                        // The codec skips the rest of the line by itself.
                        self.stats.skipped_lines += 1;
                        warn!("Skipping line: {e}");
                    }
                }
            }
        }

        debug!("Read loop done");
    }

    fn note_sample(&self, line: &str) {
        let seen = self.stats.records;

        if seen <= self.sample_lines {
            info!("Serial data example: {line}");
        }
        if seen == self.sample_lines + 1 {
            info!("Data flowing...");
        }
    }

    fn handle_line(&mut self, line: &str, session: &mut Option<SessionLog>) {
        let columns = match self.parser.parse(line) {
            ParsedLine::Empty => return,
            ParsedLine::Header(columns) => {
                self.stats.lines += 1;
                columns
            }
            ParsedLine::Data(fields) => {
                self.stats.lines += 1;
                self.stats.records += 1;
                self.note_sample(line.trim());

                let record = self.schema.current().reconcile(fields);

                if let Some(session) = session.as_mut() {
                    if let Err(e) = session.write_record(&record) {
                        warn!("Could not log record: {e}");
                        self.stats.log_failures += 1;
                    }
                }

                if let Err(e) = self.sink.publish(&record) {
                    warn!("Could not publish record: {e}");
                    self.stats.publish_failures += 1;
                }

                return;
            }
        };

        match self.schema.replace(columns) {
            Ok(schema) => {
                info!(%schema, "New schema");
                self.stats.headers += 1;

                if let Some(session) = session.as_mut() {
                    if let Err(e) = session.write_header(schema) {
                        warn!("Could not log header: {e}");
                        self.stats.log_failures += 1;
                    }
                }
            }
            Err(e) => warn!("Ignoring header line `{line}`: {e}"),
        }
    }
}

/// A handle to a spawned [`Ingestor`].
#[derive(Debug)]
pub struct IngestHandle {
    state: watch::Receiver<ConnectionState>,
    stop: CancellationToken,
    task: JoinHandle<IngestSummary>,
}

impl IngestHandle {
    /// Ask the run to stop.
    /// Safe to call any number of times, also after the run ended.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// A token which stops the run when cancelled, usable from anywhere.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Has the task ended?
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the run reaches `wanted` or ends.
    /// Returns the state reached.
    pub async fn wait_for(&mut self, wanted: ConnectionState) -> ConnectionState {
        loop {
            let state = *self.state.borrow_and_update();
            if state == wanted || state.is_finished() {
                return state;
            }

            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }

    /// Wait for the run to end.
    pub async fn join(self) -> IngestSummary {
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Ingestion task ended abnormally: {e}");
                IngestSummary {
                    state: ConnectionState::Failed,
                    port: None,
                    session: None,
                    stats: IngestStats::default(),
                }
            }
        }
    }

    /// Stop, then wait for the run to end.
    pub async fn shutdown(self) -> IngestSummary {
        self.stop();
        self.join().await
    }
}
