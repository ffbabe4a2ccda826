//! A mock, useful to test ingestion without an actual serial device.
//!
//! [`MockPorts`] stands in for the host's serial devices.
//! Opening its single device yields a [`MockLink`], which hands out whatever
//! bytes (or IO errors) were injected through the matching [`MockLinkHandle`].

use std::{
    collections::HashSet,
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    Stream,
};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info};

use crate::{
    error::Error,
    port::{PortBackend, PortCandidate},
    serial::SerialMessageBytes,
};

type Chunk = io::Result<SerialMessageBytes>;

/// The reading end of a mock serial device.
#[derive(Debug)]
pub struct MockLink {
    chunks: UnboundedReceiver<Chunk>,
    leftover: SerialMessageBytes,
}

/// Injects data into a [`MockLink`].
#[derive(Debug, Clone)]
pub struct MockLinkHandle(UnboundedSender<Chunk>);

/// Create a connected mock link and its handle.
pub fn link() -> (MockLink, MockLinkHandle) {
    let (tx, rx) = mpsc::unbounded();

    (
        MockLink {
            chunks: rx,
            leftover: vec![],
        },
        MockLinkHandle(tx),
    )
}

impl MockLinkHandle {
    fn push(&self, chunk: Chunk) {
        if self.0.unbounded_send(chunk).is_err() {
            debug!("Mock link is gone");
        }
    }

    /// Make these bytes readable.
    pub fn send(&self, bytes: impl Into<SerialMessageBytes>) {
        self.push(Ok(bytes.into()));
    }

    /// Make this line readable, a newline is appended.
    pub fn send_line(&self, line: &str) {
        self.send(format!("{line}\n"));
    }

    /// Make the next read fail.
    pub fn send_error(&self, kind: io::ErrorKind) {
        self.push(Err(io::Error::new(kind, "Injected mock error")));
    }
}

impl AsyncRead for MockLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.leftover.is_empty() {
            match Pin::new(&mut self.chunks).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.leftover = bytes,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // Every handle is dropped, so this is end of file.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let amount = self.leftover.len().min(buf.remaining());
        buf.put_slice(&self.leftover[..amount]);
        self.leftover.drain(..amount);

        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Default)]
struct MockPortsState {
    link: Option<MockLink>,
    probes: Vec<String>,
    opened: Vec<String>,
}

/// A fake set of host serial devices.
#[derive(Debug, Default, Clone)]
pub struct MockPorts {
    listed: Vec<PortCandidate>,
    openable: HashSet<String>,
    state: Arc<Mutex<MockPortsState>>,
}

impl MockPorts {
    /// No devices at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enumerated device.
    /// If not `openable`, probing or opening it fails as if it was busy.
    pub fn with_port(mut self, path: &str, description: &str, openable: bool) -> Self {
        self.listed.push(PortCandidate::new(path, description));
        if openable {
            self.openable.insert(path.to_owned());
        }
        self
    }

    /// Add a device which can be opened but is not enumerated,
    /// such as a symlink given explicitly.
    pub fn with_hidden_port(mut self, path: &str) -> Self {
        self.openable.insert(path.to_owned());
        self
    }

    /// Create the link handed out by the next successful [`PortBackend::open`].
    pub fn attach_link(&self) -> MockLinkHandle {
        let (link, handle) = link();
        self.lock().link = Some(link);
        handle
    }

    /// Paths probed so far, in order.
    pub fn probes(&self) -> Vec<String> {
        self.lock().probes.clone()
    }

    /// Paths opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockPortsState> {
        self.state.lock().expect("Mock state lock is never poisoned")
    }

    fn busy(path: &str) -> Error {
        Error::Open {
            path: path.to_owned(),
            problem: "Device or resource busy".into(),
        }
    }
}

impl PortBackend for MockPorts {
    type Link = MockLink;

    fn probe(&self, path: &str) -> Result<(), Error> {
        self.lock().probes.push(path.to_owned());

        if self.openable.contains(path) {
            Ok(())
        } else {
            Err(Self::busy(path))
        }
    }

    fn available(&self) -> Result<Vec<PortCandidate>, Error> {
        Ok(self.listed.clone())
    }

    fn open(&self, path: &str, baud: u32) -> Result<Self::Link, Error> {
        if !self.openable.contains(path) {
            return Err(Self::busy(path));
        }

        let mut state = self.lock();
        let link = state.link.take().ok_or_else(|| Self::busy(path))?;
        state.opened.push(path.to_owned());

        info!(%path, %baud, "Opened mock serial port");
        Ok(link)
    }
}
