//! A per-connection streaming file server.
//!
//! Each accepted connection gets its own [`session::ConnectionSession`], driven by
//! [`micro_file_http::connection::HttpConnection`]:
//!
//! - `GET /<percent-encoded path>` streams the file under the root as an attachment,
//!   in fixed-size chunks ([`download`])
//! - `POST` bodies are decoded as form data ([`upload`]) and answered once consumed
//! - every other method is answered with 501
//!
//! A decoded path containing `../` is rejected with 403 ([`path`]). Every response
//! closes the connection.
//!
//! # Example
//!
//! ```no_run
//! use micro_file_server::config::SessionConfig;
//! use micro_file_server::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::builder()
//!         .address("127.0.0.1:8080")
//!         .config(SessionConfig::new("/data"))
//!         .build()
//!         .expect("address and config are set");
//!     server.start().await
//! }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod path;
pub mod server;
pub mod session;
pub mod upload;
