//! Protocol types shared by the codec, the connection driver and handlers.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: the event model. A request is
//!   one `Header` message, any number of `Payload(Chunk)` messages and one
//!   `Payload(Eof)`; a response has the same shape.
//! - [`RequestHeader`]: the decoded request line and header fields.
//! - [`ResponseHead`]: the status line and header fields of a response.
//! - [`HttpError`], [`ParseError`], [`SendError`]: transport errors.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;
pub use response::continue_head;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
