//! Response body encoder.
//!
//! A fixed-length body refuses to write more bytes than were declared in the head and
//! reports an error if the body ends short, so `Content-Length` can never disagree
//! with what went on the wire.

use crate::protocol::{PayloadItem, PayloadSize, SendError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
    finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length { remaining: u64 },
    Chunked,
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody, finished: false }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked, finished: false }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length { remaining: size }, finished: false }
    }

    /// Whether the end-of-body item has been encoded.
    pub fn is_finish(&self) -> bool {
        self.finished
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(size) => PayloadEncoder::fix_length(size),
            PayloadSize::Chunked => PayloadEncoder::chunked(),
            PayloadSize::Empty => PayloadEncoder::empty(),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.finished {
            return Err(SendError::unexpected_message("payload item after end of body"));
        }

        match (&mut self.kind, item) {
            (Kind::Length { remaining }, PayloadItem::Chunk(mut data)) => {
                let len = data.remaining() as u64;
                if len > *remaining {
                    return Err(SendError::invalid_body(format!("body exceeds content-length by {} bytes", len - *remaining)));
                }
                *remaining -= len;
                dst.put(&mut data);
            }
            (Kind::Length { remaining }, PayloadItem::Eof) => {
                if *remaining > 0 {
                    return Err(SendError::invalid_body(format!("body ended {remaining} bytes short of content-length")));
                }
                self.finished = true;
            }

            (Kind::Chunked, PayloadItem::Chunk(mut data)) => {
                let len = data.remaining();
                if len > 0 {
                    dst.reserve(len + 12);
                    dst.put_slice(format!("{len:X}\r\n").as_bytes());
                    dst.put(&mut data);
                    dst.put_slice(b"\r\n");
                }
            }
            (Kind::Chunked, PayloadItem::Eof) => {
                dst.put_slice(b"0\r\n\r\n");
                self.finished = true;
            }

            (Kind::NoBody, PayloadItem::Chunk(data)) => {
                if data.has_remaining() {
                    return Err(SendError::invalid_body("body bytes for a response without body"));
                }
            }
            (Kind::NoBody, PayloadItem::Eof) => self.finished = true,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(data: &'static [u8]) -> PayloadItem {
        PayloadItem::Chunk(Bytes::from_static(data))
    }

    #[test]
    fn fixed_length_passes_bytes_through() {
        let mut encoder = PayloadEncoder::fix_length(8);
        let mut dst = BytesMut::new();

        encoder.encode(chunk(b"abcd"), &mut dst).unwrap();
        encoder.encode(chunk(b"efgh"), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"abcdefgh");
        assert!(encoder.is_finish());
    }

    #[test]
    fn fixed_length_rejects_overflow_and_short_body() {
        let mut dst = BytesMut::new();
        assert!(PayloadEncoder::fix_length(2).encode(chunk(b"abc"), &mut dst).is_err());

        let mut encoder = PayloadEncoder::fix_length(4);
        encoder.encode(chunk(b"ab"), &mut dst).unwrap();
        assert!(encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).is_err());
        assert!(!encoder.is_finish());
    }

    #[test]
    fn chunked_framing() {
        let mut encoder = PayloadEncoder::chunked();
        let mut dst = BytesMut::new();

        encoder.encode(chunk(b"hello, world"), &mut dst).unwrap();
        encoder.encode(chunk(b""), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"C\r\nhello, world\r\n0\r\n\r\n");
    }

    #[test]
    fn nothing_after_eof() {
        let mut encoder = PayloadEncoder::empty();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert!(encoder.encode(chunk(b"x"), &mut dst).is_err());
    }
}
