//! NDJSON codec for the agent CLI stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! to prevent memory exhaustion caused by unterminated or maliciously large
//! messages from a misbehaving agent process. Used as the codec parameter
//! for [`tokio_util::codec::FramedRead`] over the child's stdout.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
///
/// Lines exceeding this limit cause [`NdjsonCodec::decode`] to return
/// [`AppError::Agent`] with `"line too long"` rather than allocating
/// unbounded memory for a single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON codec for the agent CLI's stdio streams.
///
/// Delegates line-framing to [`LinesCodec`] with the fixed
/// [`MAX_LINE_BYTES`] limit. Each newline-terminated UTF-8 string is one
/// complete upstream message.
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Create a new codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // The max-length limit is a decoder-side concern only.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Agent(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
