use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::HttpError;

/// Read buffer size, large enough for a full request head.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// The response sink handed to a handler: response events in, encoded bytes out.
pub type ResponseWriter<W> = FramedWrite<W, ResponseEncoder>;

/// Drives one connection: decodes request events from the reader and feeds them to a
/// [`Handler`] that writes its responses through a [`ResponseWriter`].
///
/// Events are delivered one at a time and in order; the next event is not read before
/// the handler has finished with the previous one.
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: ResponseWriter<W>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUFFER_SIZE),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    /// Runs the connection until the handler closes it or the peer goes away.
    ///
    /// `make_handler` receives the response writer and returns the handler for this
    /// connection. A decode or read failure is passed to
    /// [`Handler::on_transport_error`] and returned.
    pub async fn process<H, F>(self, make_handler: F) -> Result<(), HttpError>
    where
        H: Handler,
        F: FnOnce(ResponseWriter<W>) -> H,
    {
        let Self { mut framed_read, framed_write } = self;
        let mut handler = make_handler(framed_write);

        while !handler.is_closed() {
            match framed_read.next().await {
                Some(Ok(message)) => handler.on_message(message).await,

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request event");
                    let e = HttpError::from(e);
                    handler.on_transport_error(&e).await;
                    return Err(e);
                }

                None => {
                    info!("peer closed the connection");
                    handler.on_disconnect();
                    return Ok(());
                }
            }
        }

        debug!("handler closed the connection");
        Ok(())
    }
}
