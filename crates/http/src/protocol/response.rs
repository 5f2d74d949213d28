//! Response head type.
//!
//! A response travels to the encoder as its head first and its body as a
//! sequence of [`PayloadItem`](crate::protocol::PayloadItem)s, so the head is a
//! plain `http::Response` carrying no body.

use http::{Response, StatusCode};

/// The status line and headers of a response, without its body.
pub type ResponseHead = Response<()>;

/// Builds the interim `100 Continue` head sent before reading an upload body.
pub fn continue_head() -> ResponseHead {
    let mut head = ResponseHead::new(());
    *head.status_mut() = StatusCode::CONTINUE;
    head
}
