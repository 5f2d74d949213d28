//! The event contract between a connection and the code that answers it.
//!
//! [`HttpConnection`](crate::connection::HttpConnection) owns the read half of a socket and
//! delivers request events to a [`Handler`] strictly in arrival order, one at a time. The
//! handler owns the write half (handed over as a response sink when it is created) and
//! decides when the connection is done by reporting [`Handler::is_closed`].

use bytes::Bytes;

use crate::protocol::{HttpError, Message, PayloadSize, RequestHeader, ResponseHead};

/// A request event: the head, a body chunk or the end of the body.
pub type IncomingMessage = Message<(RequestHeader, PayloadSize)>;

/// A response event, as accepted by [`ResponseWriter`](crate::connection::ResponseWriter).
pub type OutgoingMessage<D = Bytes> = Message<(ResponseHead, PayloadSize), D>;

/// Per-connection request handler.
#[trait_variant::make(Send)]
pub trait Handler {
    /// Processes one request event. May write any number of response events.
    async fn on_message(&mut self, message: IncomingMessage);

    /// The inbound byte stream could not be decoded or read. Called at most once; the
    /// connection stops reading afterwards.
    async fn on_transport_error(&mut self, error: &HttpError);

    /// The peer closed its side before the handler closed the connection.
    fn on_disconnect(&mut self);

    /// Once true, the connection stops delivering events.
    fn is_closed(&self) -> bool;
}
