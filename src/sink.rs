use tokio::sync::broadcast;
use tracing::trace;

use crate::{error::Error, telemetry::Record};

/// Somewhere to hand parsed records to.
///
/// Called once per accepted data line from the ingestion task, so it should return quickly.
/// A sink which may block must offload its own dispatch.
pub trait PublishSink: Send + Sync + 'static {
    /// Hand a record to whoever listens.
    fn publish(&self, record: &Record) -> Result<(), Error>;
}

impl<F> PublishSink for F
where
    F: Fn(&Record) -> Result<(), Error> + Send + Sync + 'static,
{
    fn publish(&self, record: &Record) -> Result<(), Error> {
        self(record)
    }
}

/// Fans records out to any number of live subscribers.
///
/// Records published while nobody is subscribed are dropped.
/// A subscriber falling more than the channel capacity behind skips records.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Record>,
}

impl BroadcastSink {
    /// Create a sink buffering at most `capacity` records per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receive records published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.tx.subscribe()
    }

    /// How many subscribers there are right now.
    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl PublishSink for BroadcastSink {
    fn publish(&self, record: &Record) -> Result<(), Error> {
        match self.tx.send(record.clone()) {
            Ok(listeners) => trace!("Broadcasted record to {listeners} listener(s)"),
            Err(_) => trace!("No listeners for record"),
        }

        Ok(())
    }
}
