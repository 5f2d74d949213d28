//! Streaming HTTP/1.1 plumbing for the micro-file server.
//!
//! This crate turns a socket into an ordered stream of request events and a sink for
//! response events. It knows nothing about files: the application supplies a
//! [`handler::Handler`] per connection and decides what to answer.
//!
//! # Event model
//!
//! A request arrives as exactly one `Message::Header`, zero or more
//! `Message::Payload(PayloadItem::Chunk(_))` and one `Message::Payload(PayloadItem::Eof)`.
//! A response is written the same way, with a [`protocol::ResponseHead`] instead of a
//! [`protocol::RequestHeader`]. Bodies are never collected into a single buffer on either
//! side.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use futures::SinkExt;
//! use http::{Response, StatusCode};
//! use micro_file_http::connection::{HttpConnection, ResponseWriter};
//! use micro_file_http::handler::{Handler, IncomingMessage, OutgoingMessage};
//! use micro_file_http::protocol::{HttpError, Message, PayloadItem, PayloadSize};
//! use tokio::net::TcpListener;
//!
//! struct NoContent {
//!     writer: ResponseWriter<tokio::net::tcp::OwnedWriteHalf>,
//!     closed: bool,
//! }
//!
//! impl Handler for NoContent {
//!     async fn on_message(&mut self, message: IncomingMessage) {
//!         if let Message::Payload(PayloadItem::Eof) = message {
//!             let head = Response::builder().status(StatusCode::NO_CONTENT).body(()).unwrap();
//!             let _ = self.writer.feed(Message::<_, Bytes>::Header((head, PayloadSize::Empty))).await;
//!             let _ = self.writer.feed(Message::<_, Bytes>::Payload(PayloadItem::Eof)).await;
//!             let _ = SinkExt::<OutgoingMessage>::close(&mut self.writer).await;
//!             self.closed = true;
//!         }
//!     }
//!
//!     async fn on_transport_error(&mut self, _error: &HttpError) {
//!         self.closed = true;
//!     }
//!
//!     fn on_disconnect(&mut self) {
//!         self.closed = true;
//!     }
//!
//!     fn is_closed(&self) -> bool {
//!         self.closed
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         tokio::spawn(async move {
//!             let (reader, writer) = stream.into_split();
//!             let _ = HttpConnection::new(reader, writer).process(|writer| NoContent { writer, closed: false }).await;
//!         });
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: event, head and error types
//! - [`codec`]: request decoder and response encoder
//! - [`handler`]: the per-connection handler contract
//! - [`connection`]: the connection driver
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only, no TLS
//! - one request per connection: every response carries `connection: close`
//! - request heads are limited to 8KB and 64 header fields

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
