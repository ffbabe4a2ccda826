//! Owns the ingestion run of a process.
//!
//! At most one run is active at a time: starting while one is active does nothing.

use std::{path::PathBuf, sync::Arc};

use tracing::{debug, info};

use crate::{
    config::Config,
    ingest::{ConnectionState, IngestBuilder, IngestHandle, IngestSummary},
    port::PortBackend,
    sink::PublishSink,
};

/// Starts and stops ingestion runs.
#[derive(Debug)]
pub struct TelemetryControl<B, S> {
    backend: Arc<B>,
    sink: Arc<S>,
    config: Config,
    env_override: Option<Option<String>>,
    active: Option<IngestHandle>,
    last: Option<IngestSummary>,
}

impl<B: PortBackend, S: PublishSink> TelemetryControl<B, S> {
    /// Runs will read from `backend` and publish to `sink`.
    /// Everything not given to [`TelemetryControl::start`] comes from `config`.
    pub fn new(backend: B, sink: S, config: Config) -> Self {
        Self {
            backend: Arc::new(backend),
            sink: Arc::new(sink),
            config,
            env_override: None,
            active: None,
            last: None,
        }
    }

    /// Use this instead of the `SERIAL_PORT` environment variable for every run.
    pub fn set_env_override(mut self, env_override: Option<String>) -> Self {
        self.env_override = Some(env_override);
        self
    }

    /// Start a run in the background.
    ///
    /// Does nothing and returns false if a run is already active.
    /// A run that has failed or stopped on its own does not count as active.
    pub fn start(&mut self, port: Option<String>, baud: u32, sessions_dir: PathBuf) -> bool {
        if self.is_active() {
            debug!("Ingestion already active, not starting another");
            return false;
        }

        let mut builder = IngestBuilder::new(Arc::clone(&self.backend), Arc::clone(&self.sink))
            .with_config(&self.config)
            .set_port(port)
            .set_baud(baud)
            .set_sessions_dir(sessions_dir);

        if let Some(env_override) = self.env_override.clone() {
            builder = builder.set_env_override(env_override);
        }

        info!("Starting ingestion");
        self.active = Some(builder.build().spawn());
        true
    }

    /// Start a run with everything taken from the configuration.
    pub fn start_from_config(&mut self) -> bool {
        let port = self.config.port.clone();
        let baud = self.config.baud;
        let sessions_dir = self.config.sessions_dir.clone();

        self.start(port, baud, sessions_dir)
    }

    /// Is a run going on right now?
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map(|handle| !handle.is_finished() && !handle.state().is_finished())
            .unwrap_or(false)
    }

    /// The state of the current run, or of the last one.
    /// [`ConnectionState::Idle`] if nothing was ever started.
    pub fn state(&self) -> ConnectionState {
        match (&self.active, &self.last) {
            (Some(handle), _) => handle.state(),
            (None, Some(summary)) => summary.state,
            (None, None) => ConnectionState::Idle,
        }
    }

    /// A handle to the current run, to wait on state changes for example.
    pub fn handle_mut(&mut self) -> Option<&mut IngestHandle> {
        self.active.as_mut()
    }

    /// Stop the current run and wait for it to wind down.
    ///
    /// Safe to call any number of times, or before anything was started.
    /// Returns the summary of the run this call ended, if any.
    pub async fn stop(&mut self) -> Option<IngestSummary> {
        let handle = self.active.take()?;

        info!("Stopping ingestion");
        let summary = handle.shutdown().await;
        self.last = Some(summary.clone());

        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{mock::MockPorts, sink::BroadcastSink};

    fn config() -> Config {
        Config {
            poll_interval_ms: 1,
            read_backoff_ms: 5,
            read_timeout_ms: 50,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn stop_before_start_is_fine() {
        let mut control = TelemetryControl::new(MockPorts::new(), BroadcastSink::default(), config());

        assert!(control.stop().await.is_none());
        assert!(control.stop().await.is_none());
        assert_eq!(control.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn second_start_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let ports = MockPorts::new().with_port("/dev/ttyACM0", "Teensyduino", true);
        let _link = ports.attach_link();

        let mut control = TelemetryControl::new(ports.clone(), BroadcastSink::default(), config())
            .set_env_override(None);

        assert!(control.start(None, 115_200, tmp.path().into()));
        control
            .handle_mut()
            .unwrap()
            .wait_for(ConnectionState::Running)
            .await;

        assert!(!control.start(None, 115_200, tmp.path().into()));
        assert_eq!(ports.opened().len(), 1);

        let summary = control.stop().await.unwrap();
        assert_eq!(summary.state, ConnectionState::Stopped);

        assert!(control.stop().await.is_none());
        assert_eq!(control.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn failed_run_allows_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let ports = MockPorts::new();

        let mut control = TelemetryControl::new(ports, BroadcastSink::default(), config())
            .set_env_override(None);

        assert!(control.start(Some("bogus0".into()), 115_200, tmp.path().into()));
        let state = control
            .handle_mut()
            .unwrap()
            .wait_for(ConnectionState::Running)
            .await;
        assert_eq!(state, ConnectionState::Failed);

        tokio::time::timeout(Duration::from_secs(5), async {
            while control.is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(control.start(None, 115_200, tmp.path().into()));
        assert_eq!(control.stop().await.unwrap().state, ConnectionState::Failed);
    }
}
