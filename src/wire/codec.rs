//! NDJSON codec for bridge channels.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized frame cannot exhaust memory on the receiving
//! side. Use [`BridgeCodec`] with [`tokio_util::codec::FramedRead`] for
//! inbound frames; the writer task encodes directly through the
//! [`Encoder`] impl.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the decoder: 4 MiB.
///
/// Tool results carry file contents, so the limit is larger than a typical
/// control-protocol frame.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Newline-delimited JSON codec. Each `\n`-terminated UTF-8 line is one
/// envelope.
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] decode to
/// [`AppError::Codec`]`("line too long: …")`; the oversized line is
/// discarded and decoding resumes at the next newline. I/O errors map to
/// [`AppError::Io`].
#[derive(Debug)]
pub struct BridgeCodec(LinesCodec);

impl BridgeCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for BridgeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BridgeCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for BridgeCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line. The length limit is a
    /// decoder-side concern.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Codec("line too long: exceeded maximum frame size".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
