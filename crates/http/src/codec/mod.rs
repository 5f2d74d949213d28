//! Wire codec for HTTP/1.1 messages.
//!
//! - [`RequestDecoder`]: bytes → `Message<(RequestHeader, PayloadSize)>` events
//! - [`ResponseEncoder`]: `Message<(ResponseHead, PayloadSize)>` events → bytes
//!
//! Both plug into `tokio_util::codec::{FramedRead, FramedWrite}`.
//!
//! ```no_run
//! use micro_file_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from(&b"GET /report.pdf HTTP/1.1\r\n\r\n"[..]);
//! let header = decoder.decode(&mut buffer);
//! let end_of_body = decoder.decode(&mut buffer);
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
