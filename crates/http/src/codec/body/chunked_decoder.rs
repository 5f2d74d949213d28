//! `Transfer-Encoding: chunked` request bodies.
//!
//! refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding>
//!
//! Framing bytes are consumed one at a time by a small state machine; chunk data is
//! split off the buffer in one piece, so a data chunk is never copied.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    /// bytes left in the current chunk, or the size being parsed
    remaining: u64,
    size_digits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    /// start of a trailer line, or the final empty line
    TrailerStart,
    TrailerLine,
    TrailerLf,
    EndLf,
    Done,
}

/// 16 hex digits fill a u64
const MAX_SIZE_DIGITS: u8 = 16;

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, remaining: 0, size_digits: 0 }
    }

    fn step(&mut self, byte: u8) -> Result<State, ParseError> {
        use State::*;

        let next = match (self.state, byte) {
            (Size, b) if b.is_ascii_hexdigit() => {
                if self.size_digits == MAX_SIZE_DIGITS {
                    return Err(ParseError::invalid_chunk("chunk size overflow"));
                }
                let digit = u64::from(char::from(b).to_digit(16).unwrap_or_default());
                self.remaining = (self.remaining << 4) | digit;
                self.size_digits += 1;
                Size
            }
            (Size | SizeLws, b' ' | b'\t') if self.size_digits > 0 => SizeLws,
            (Size | SizeLws, b';') if self.size_digits > 0 => Extension,
            (Size | SizeLws, b'\r') if self.size_digits > 0 => SizeLf,

            // extensions are ignored, but a bare LF inside one is not tolerated
            (Extension, b'\n') => return Err(ParseError::invalid_chunk("chunk extension contains newline")),
            (Extension, b'\r') => SizeLf,
            (Extension, _) => Extension,

            (SizeLf, b'\n') => {
                self.size_digits = 0;
                if self.remaining == 0 { TrailerStart } else { Data }
            }

            (DataCr, b'\r') => DataLf,
            (DataLf, b'\n') => Size,

            (TrailerStart, b'\r') => EndLf,
            (TrailerStart | TrailerLine, b'\n') => return Err(ParseError::invalid_chunk("trailer line without CR")),
            (TrailerStart | TrailerLine, b'\r') => TrailerLf,
            (TrailerStart | TrailerLine, _) => TrailerLine,
            (TrailerLf, b'\n') => TrailerStart,

            (EndLf, b'\n') => Done,

            (state, byte) => {
                return Err(ParseError::invalid_chunk(format!("unexpected byte {byte:#04x} in state {state:?}")));
            }
        };
        Ok(next)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Done => {
                    trace!("finished reading chunked body");
                    return Ok(Some(PayloadItem::Eof));
                }

                State::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = usize::try_from(self.remaining).map_or(src.len(), |remaining| remaining.min(src.len()));
                    let bytes = src.split_to(len).freeze();
                    self.remaining -= len as u64;
                    if self.remaining == 0 {
                        self.state = State::DataCr;
                    }
                    trace!(len, "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                _ => {
                    let Some(&byte) = src.first() else {
                        return Ok(None);
                    };
                    src.advance(1);
                    self.state = self.step(byte)?;
                }
            }
        }
    }
}
