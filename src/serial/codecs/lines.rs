use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::serial::SerialMessageBytes;

/// Longest line accepted by default, delimiter excluded.
/// Collector lines are around a hundred bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// This codec has a configurable delimiter character for reading.
///
/// Lines longer than the maximum length are reported once as an
/// [`io::ErrorKind::InvalidData`] error, then skipped up to and including the
/// next delimiter. Decoding may continue after such an error.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    max_length: usize,

    /// Dropping the rest of an overlong line.
    discarding: bool,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8) -> Self {
        Self::new_with_max_length(read_delimiter, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a new codec which skips lines longer than `max_length` bytes.
    pub fn new_with_max_length(read_delimiter: u8, max_length: usize) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            max_length,
            discarding: false,
        }
    }

    /// Return a [StringCodec], which does the same thing as the underlying [LinesCodec].
    /// The difference is that it yields strings instead of vectors of bytes.
    /// Bad utf8 is replaced with the unicode replacement character, never an error.
    pub fn into_string_codec(self) -> StringCodec {
        StringCodec { wrapped: self }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = SerialMessageBytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Never look further than one byte past the longest allowed line.
            let read_to = src.len().min(self.max_length.saturating_add(1));

            let position = src[self.cursor..read_to]
                .iter()
                .position(|&byte| byte == self.read_delimiter);

            match (self.discarding, position) {
                (true, Some(position)) => {
                    src.advance(self.cursor + position + 1);
                    self.cursor = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.cursor = 0;

                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(position)) => {
                    // Since we might "start late" in the buffer (from the cursor),
                    // the "global" position within the buffer has to be calculated.
                    let actual_position = self.cursor + position;

                    self.cursor = 0;

                    let line = src.split_to(actual_position);

                    // Drop the delimiter itself.
                    src.advance(1);

                    return Ok(Some(line[..].to_vec()));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                    self.cursor = 0;

                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line longer than {} bytes", self.max_length),
                    ));
                }
                (false, None) => {
                    // No full frame yet.
                    // We will be handed the same buffer again, possibly with more data,
                    // so there is no need to look at these bytes twice.
                    self.cursor = read_to;

                    return Ok(None);
                }
            }
        }
    }
}

/// Yields each line as a string, decoded as lossy utf8.
#[derive(Debug, Clone, Default)]
pub struct StringCodec {
    wrapped: LinesCodec,
}

impl Decoder for StringCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self
            .wrapped
            .decode(src)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}
