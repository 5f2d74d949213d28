//! Connection driver.
//!
//! [`HttpConnection`] reads request events off a socket with the
//! [`RequestDecoder`](crate::codec::RequestDecoder), hands them in order to a
//! [`Handler`](crate::handler::Handler), and gives that handler a [`ResponseWriter`]
//! for its response events. One connection serves one request: the handler closes
//! the writer after its response and the driver stops reading.

mod http_connection;

pub use http_connection::HttpConnection;
pub use http_connection::ResponseWriter;
