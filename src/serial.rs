use tokio::io::AsyncRead;

/// Codecs for decoding messages from wire.
pub mod codecs;

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

/// A byte source ingestion can read telemetry from.
///
/// Implemented by real serial streams as well as [`crate::mock::MockLink`].
pub trait SerialLink: AsyncRead + Unpin + Send + 'static {}

impl<T: AsyncRead + Unpin + Send + 'static> SerialLink for T {}
