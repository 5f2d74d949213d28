//! Response head encoder.
//!
//! Writes the status line, sets the framing header that matches the
//! [`PayloadSize`], and marks every final response `connection: close`: a
//! connection serves exactly one request. Interim (1xx) heads carry neither.

use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderValue, Version};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

const INIT_HEADER_SIZE: usize = 4 * 1024;

const CLOSE: HeaderValue = HeaderValue::from_static("close");
const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        let status = head.status();
        write!(BufWriter(dst), "{version} {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or_default())?;

        if !status.is_informational() {
            let headers = head.headers_mut();
            match payload_size {
                PayloadSize::Length(n) => {
                    headers.remove(TRANSFER_ENCODING);
                    headers.insert(CONTENT_LENGTH, n.into());
                }
                PayloadSize::Chunked => {
                    headers.remove(CONTENT_LENGTH);
                    headers.insert(TRANSFER_ENCODING, CHUNKED);
                }
                PayloadSize::Empty => {
                    headers.remove(TRANSFER_ENCODING);
                    headers.insert(CONTENT_LENGTH, 0.into());
                }
            }
            headers.insert(CONNECTION, CLOSE);
        }

        for (name, value) in head.headers() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// `io::Write` adapter over `BytesMut`, used for the formatted status line.
struct BufWriter<'a>(&'a mut BytesMut);

impl Write for BufWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn fixed_length_download_head() {
        let head = Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_DISPOSITION, "attachment; filename=\"report.pdf\"")
            .body(())
            .unwrap();

        let encoded = encode(head, PayloadSize::Length(17));

        assert!(encoded.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(encoded.contains("content-length: 17\r\n"));
        assert!(encoded.contains("content-disposition: attachment; filename=\"report.pdf\"\r\n"));
        assert!(encoded.contains("connection: close\r\n"));
        assert!(encoded.ends_with("\r\n\r\n"));
    }

    #[test]
    fn empty_error_head() {
        let head = Response::builder().status(StatusCode::FORBIDDEN).body(()).unwrap();
        let encoded = encode(head, PayloadSize::Empty);
        assert!(encoded.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(encoded.contains("content-length: 0\r\n"));
        assert!(encoded.contains("connection: close\r\n"));
        assert!(encoded.ends_with("\r\n\r\n"));
    }

    #[test]
    fn chunked_head_drops_content_length() {
        let head = Response::builder().header(CONTENT_LENGTH, 10).body(()).unwrap();
        let encoded = encode(head, PayloadSize::Chunked);
        assert!(encoded.contains("transfer-encoding: chunked\r\n"));
        assert!(!encoded.contains("content-length"));
    }

    #[test]
    fn interim_head_has_no_framing() {
        assert_eq!(encode(crate::protocol::continue_head(), PayloadSize::Empty), "HTTP/1.1 100 Continue\r\n\r\n");
    }
}
