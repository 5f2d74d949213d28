//! The per-connection state machine.
//!
//! A [`ConnectionSession`] receives the request events of one connection in order and
//! writes response events to its sink:
//!
//! - `GET` streams the requested file ([`download::file_response`])
//! - `POST` creates an [`UploadDecoder`], feeds it every body chunk and answers once
//!   the body has ended
//! - any other method is answered with 501
//!
//! Every response closes the connection, and every failure is finalized the same way:
//! the upload decoder (if any) is destroyed, an empty error response is written unless
//! a response head is already out, and the sink is closed exactly once.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Sink, SinkExt};
use http::{Method, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use micro_file_http::handler::{Handler, IncomingMessage, OutgoingMessage};
use micro_file_http::protocol::{
    HttpError, Message, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError, continue_head,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::{SessionConfig, UploadMode};
use crate::download;
use crate::error::SessionError;
use crate::path::ResolvedPath;
use crate::upload::UploadDecoder;

/// The methods a session tells apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Other(Method),
}

impl From<&Method> for RequestMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => Self::Get,
            Method::POST => Self::Post,
            _ => Self::Other(method.clone()),
        }
    }
}

/// State of one connection: shared settings, the response sink and at most one
/// in-flight upload.
pub struct ConnectionSession<W> {
    config: Arc<SessionConfig>,
    writer: W,
    active_decoder: Option<UploadDecoder>,
    /// A final response head has been written.
    committed: bool,
    closed: bool,
}

impl<W> fmt::Debug for ConnectionSession<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("root", &self.config.root)
            .field("active_decoder", &self.active_decoder.is_some())
            .field("committed", &self.committed)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<W> ConnectionSession<W>
where
    W: Sink<OutgoingMessage, Error = SendError> + Unpin + Send,
{
    pub fn new(config: Arc<SessionConfig>, writer: W) -> Self {
        Self { config, writer, active_decoder: None, committed: false, closed: false }
    }

    pub fn has_active_decoder(&self) -> bool {
        self.active_decoder.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    async fn on_header(&mut self, header: RequestHeader) -> Result<(), SessionError> {
        if self.active_decoder.is_some() {
            return Err(SessionError::internal("request head while an upload is in flight"));
        }

        info!(method = %header.method(), uri = %header.uri(), "receive request");
        match RequestMethod::from(header.method()) {
            RequestMethod::Get => self.download(&header).await,
            RequestMethod::Post => self.begin_upload(&header).await,
            RequestMethod::Other(method) => Err(SessionError::NotImplemented { method }),
        }
    }

    async fn download(&mut self, header: &RequestHeader) -> Result<(), SessionError> {
        let path = ResolvedPath::resolve(&self.config.root, header.uri())?;
        let response = download::file_response(&path, self.config.chunk_size).await?;
        self.respond(response).await
    }

    async fn begin_upload(&mut self, header: &RequestHeader) -> Result<(), SessionError> {
        self.active_decoder = Some(UploadDecoder::new(header, &self.config.upload)?);

        if header.expects_continue() {
            self.writer.send(Message::Header((continue_head(), PayloadSize::Empty))).await?;
            debug!("sent 100 continue");
        }
        Ok(())
    }

    async fn on_chunk(&mut self, chunk: Bytes) -> Result<(), SessionError> {
        match &mut self.active_decoder {
            Some(decoder) => Ok(decoder.offer(chunk).await?),
            None => {
                trace!(size = chunk.len(), "ignore body chunk without an upload");
                Ok(())
            }
        }
    }

    async fn on_end_of_body(&mut self) -> Result<(), SessionError> {
        let Some(mut decoder) = self.active_decoder.take() else {
            return Ok(());
        };

        let result = decoder.finish().await;
        decoder.destroy();
        let fields = result?;

        for field in &fields {
            info!(
                name = %field.name,
                file_name = ?field.file_name,
                content_type = ?field.content_type,
                size = field.size,
                spilled = field.spilled,
                "receive upload field"
            );
        }

        let status = match self.config.upload_mode {
            UploadMode::Acknowledge => StatusCode::OK,
            UploadMode::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        };
        self.respond(empty_response(status)).await
    }

    /// Writes `response` as head, body chunks and end marker, then closes the
    /// connection.
    async fn respond<B>(&mut self, response: Response<B>) -> Result<(), SessionError>
    where
        B: Body<Data = Bytes> + Unpin + Send,
        SessionError: From<B::Error>,
    {
        let (parts, mut body) = response.into_parts();

        let payload_size = match body.size_hint().exact() {
            Some(0) => PayloadSize::Empty,
            Some(length) => PayloadSize::Length(length),
            None => PayloadSize::Chunked,
        };

        let status = parts.status;
        self.writer.feed(Message::Header((ResponseHead::from_parts(parts, ()), payload_size))).await?;
        self.committed = true;

        while let Some(frame) = body.frame().await {
            let data = frame?.into_data().map_err(|_frame| SendError::invalid_body("trailers in response body"))?;
            self.writer.send(Message::Payload(PayloadItem::Chunk(data))).await?;
        }
        self.writer.feed(Message::Payload(PayloadItem::Eof)).await?;

        debug!(status = %status, "response written");
        self.close().await;
        Ok(())
    }

    /// Ends the request after `error`. Never fails: problems while writing the error
    /// response are logged.
    async fn finalize_error(&mut self, error: SessionError) {
        self.release_decoder();
        if self.closed {
            return;
        }

        let status = error.status_code();
        if status.is_server_error() {
            error!(cause = %error, status = %status, "request failed");
        } else {
            warn!(cause = %error, status = %status, "request rejected");
        }

        if self.committed {
            warn!("response already committed, close without error status");
            self.close().await;
            return;
        }

        if let Err(e) = self.respond(empty_response(status)).await {
            error!(cause = %e, "failed to write error response");
            self.close().await;
        }
    }

    /// Flushes and closes the sink. Only the first call has any effect.
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release_decoder();

        if let Err(e) = self.writer.close().await {
            warn!(cause = %e, "failed to close connection");
        }
    }

    fn release_decoder(&mut self) {
        if let Some(mut decoder) = self.active_decoder.take()
            && decoder.destroy()
        {
            debug!("upload decoder released");
        }
    }
}

impl<W> Handler for ConnectionSession<W>
where
    W: Sink<OutgoingMessage, Error = SendError> + Unpin + Send,
{
    async fn on_message(&mut self, message: IncomingMessage) {
        if self.closed {
            trace!("drop request event after close");
            return;
        }

        let result = match message {
            Message::Header((header, _payload_size)) => self.on_header(header).await,
            Message::Payload(PayloadItem::Chunk(chunk)) => self.on_chunk(chunk).await,
            Message::Payload(PayloadItem::Eof) => self.on_end_of_body().await,
        };

        if let Err(e) = result {
            self.finalize_error(e).await;
        }
    }

    async fn on_transport_error(&mut self, error: &HttpError) {
        if self.closed {
            return;
        }
        self.finalize_error(SessionError::internal(error)).await;
    }

    fn on_disconnect(&mut self) {
        self.release_decoder();
        if !self.closed {
            info!("peer went away before the response");
            self.closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn empty_response(status: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::ChunkStream;
    use bytes::BytesMut;
    use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, EXPECT};
    use http::{HeaderMap, Request};
    use indoc::indoc;
    use micro_file_http::connection::HttpConnection;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Debug, Default)]
    struct Recorded {
        heads: Vec<(StatusCode, HeaderMap, PayloadSize)>,
        body: BytesMut,
        eofs: usize,
        closes: usize,
    }

    /// A response sink that records everything written to it.
    #[derive(Debug, Clone, Default)]
    struct Recorder {
        recorded: Arc<Mutex<Recorded>>,
        fail_writes: bool,
    }

    impl Recorder {
        fn failing() -> Self {
            Self { fail_writes: true, ..Self::default() }
        }

        fn statuses(&self) -> Vec<StatusCode> {
            self.recorded.lock().unwrap().heads.iter().map(|(status, _, _)| *status).collect()
        }

        fn closes(&self) -> usize {
            self.recorded.lock().unwrap().closes
        }
    }

    impl Sink<OutgoingMessage> for Recorder {
        type Error = SendError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: OutgoingMessage) -> Result<(), Self::Error> {
            if self.fail_writes {
                return Err(SendError::io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
            }
            let mut recorded = self.recorded.lock().unwrap();
            match item {
                Message::Header((head, payload_size)) => {
                    recorded.heads.push((head.status(), head.headers().clone(), payload_size));
                }
                Message::Payload(PayloadItem::Chunk(data)) => recorded.body.extend_from_slice(&data),
                Message::Payload(PayloadItem::Eof) => recorded.eofs += 1,
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.recorded.lock().unwrap().closes += 1;
            Poll::Ready(Ok(()))
        }
    }

    struct Fixture {
        root: TempDir,
        spool: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self { root: tempfile::tempdir().unwrap(), spool: tempfile::tempdir().unwrap() }
        }

        fn config(&self) -> SessionConfig {
            let mut config = SessionConfig::new(self.root.path());
            config.upload.spool_dir = self.spool.path().to_path_buf();
            config.upload.spill_threshold = 16;
            config
        }

        fn session(&self) -> (ConnectionSession<Recorder>, Recorder) {
            self.session_with(self.config())
        }

        fn session_with(&self, config: SessionConfig) -> (ConnectionSession<Recorder>, Recorder) {
            let recorder = Recorder::default();
            (ConnectionSession::new(Arc::new(config), recorder.clone()), recorder)
        }

        fn spool_entries(&self) -> usize {
            std::fs::read_dir(self.spool.path()).unwrap().count()
        }
    }

    fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> IncomingMessage {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let header = RequestHeader::from(builder.body(()).unwrap());
        Message::Header((header, PayloadSize::Chunked))
    }

    fn chunk(data: &'static [u8]) -> IncomingMessage {
        Message::Payload(PayloadItem::Chunk(Bytes::from_static(data)))
    }

    fn eof() -> IncomingMessage {
        Message::Payload(PayloadItem::Eof)
    }

    const MULTIPART_TYPE: (&str, &str) = ("content-type", "multipart/form-data; boundary=XyZ");

    const MULTIPART_BODY: &[u8] = b"--XyZ\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
        \r\n\
        a field that is longer than the spill threshold\r\n\
        --XyZ--\r\n";

    #[tokio::test]
    async fn download_existing_file() {
        let fixture = Fixture::new();
        let content = b"%PDF-1.4 17 bytes";
        std::fs::write(fixture.root.path().join("report.pdf"), content).unwrap();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::GET, "/report.pdf", &[])).await;

        let recorded = recorder.recorded.lock().unwrap();
        let (status, headers, payload_size) = &recorded.heads[0];
        assert_eq!(*status, StatusCode::OK);
        assert_eq!(*payload_size, PayloadSize::Length(17));
        assert_eq!(headers[CONTENT_LENGTH], "17");
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(headers[CONTENT_DISPOSITION], "attachment; filename=\"report.pdf\"");
        assert_eq!(&recorded.body[..], content);
        assert_eq!(recorded.eofs, 1);
        assert_eq!(recorded.closes, 1);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn download_large_file_in_chunks() {
        let fixture = Fixture::new();
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(fixture.root.path().join("large.bin"), &content).unwrap();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::GET, "/large.bin", &[])).await;

        let recorded = recorder.recorded.lock().unwrap();
        assert_eq!(recorded.heads[0].2, PayloadSize::Length(100_000));
        assert_eq!(recorded.body.len(), content.len());
        assert_eq!(&recorded.body[..], &content[..]);
        assert_eq!(recorded.closes, 1);
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::GET, "/..%2f..%2fetc%2fpasswd", &[])).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::FORBIDDEN]);
        let recorded = recorder.recorded.lock().unwrap();
        assert_eq!(recorded.heads[0].2, PayloadSize::Empty);
        assert!(recorded.body.is_empty());
        assert_eq!(recorded.closes, 1);
    }

    #[tokio::test]
    async fn traversal_in_query_is_forbidden() {
        let fixture = Fixture::new();
        std::fs::write(fixture.root.path().join("a.txt"), b"visible").unwrap();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::GET, "/a.txt?x=../../etc", &[])).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::FORBIDDEN]);
        assert!(recorder.recorded.lock().unwrap().body.is_empty());
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let fixture = Fixture::new();
        std::fs::create_dir(fixture.root.path().join("dir")).unwrap();

        for uri in ["/missing.txt", "/dir"] {
            let (mut session, recorder) = fixture.session();
            session.on_message(request(Method::GET, uri, &[])).await;
            assert_eq!(recorder.statuses(), vec![StatusCode::NOT_FOUND], "uri: {uri}");
            assert_eq!(recorder.closes(), 1);
        }
    }

    #[tokio::test]
    async fn malformed_escape_is_internal_error() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::GET, "/100%", &[])).await;
        assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
    }

    #[tokio::test]
    async fn other_methods_are_not_implemented() {
        let fixture = Fixture::new();
        for method in [Method::PUT, Method::DELETE, Method::HEAD] {
            let (mut session, recorder) = fixture.session();
            session.on_message(request(method, "/report.pdf", &[])).await;
            assert_eq!(recorder.statuses(), vec![StatusCode::NOT_IMPLEMENTED]);
            assert_eq!(recorder.closes(), 1);
        }
    }

    #[tokio::test]
    async fn upload_is_answered_after_end_of_body() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[MULTIPART_TYPE])).await;
        assert!(session.has_active_decoder());
        assert!(recorder.statuses().is_empty());

        session.on_message(chunk(&MULTIPART_BODY[..40])).await;
        session.on_message(chunk(&MULTIPART_BODY[40..])).await;
        assert!(recorder.statuses().is_empty());
        assert_eq!(fixture.spool_entries(), 1);

        session.on_message(eof()).await;
        assert_eq!(recorder.statuses(), vec![StatusCode::OK]);
        assert_eq!(recorder.closes(), 1);
        assert!(!session.has_active_decoder());
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn opaque_upload_is_spooled_then_released() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[("content-type", "application/octet-stream")])).await;
        session.on_message(chunk(&[0u8; 1024])).await;
        session.on_message(chunk(&[1u8; 1024])).await;
        assert_eq!(fixture.spool_entries(), 1);

        session.on_message(eof()).await;
        assert_eq!(recorder.statuses(), vec![StatusCode::OK]);
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn oversized_url_encoded_upload_fails() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[("content-type", "application/x-www-form-urlencoded")])).await;
        session.on_message(chunk(b"name=a-value-longer-than-the-threshold")).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
        assert!(!session.has_active_decoder());
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn upload_in_not_implemented_mode() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.upload_mode = UploadMode::NotImplemented;
        let (mut session, recorder) = fixture.session_with(config);

        session.on_message(request(Method::POST, "/upload", &[])).await;
        session.on_message(chunk(b"a=1&b=2")).await;
        assert!(recorder.statuses().is_empty());

        session.on_message(eof()).await;
        assert_eq!(recorder.statuses(), vec![StatusCode::NOT_IMPLEMENTED]);
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn expect_continue_gets_interim_response() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[(EXPECT.as_str(), "100-continue")])).await;
        session.on_message(eof()).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::CONTINUE, StatusCode::OK]);
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn truncated_upload_is_internal_error() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[MULTIPART_TYPE])).await;
        session.on_message(chunk(&MULTIPART_BODY[..60])).await;
        session.on_message(eof()).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
        assert!(!session.has_active_decoder());
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn multipart_without_boundary_is_internal_error() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[("content-type", "multipart/form-data")])).await;
        assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
        assert!(!session.has_active_decoder());
    }

    #[tokio::test]
    async fn transport_error_during_upload() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[MULTIPART_TYPE])).await;
        session.on_message(chunk(MULTIPART_BODY)).await;
        assert_eq!(fixture.spool_entries(), 1);

        let error = HttpError::from(micro_file_http::protocol::ParseError::invalid_chunk("bad size"));
        session.on_transport_error(&error).await;
        session.on_transport_error(&error).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
        assert_eq!(recorder.closes(), 1);
        assert!(session.is_closed());
        assert!(!session.has_active_decoder());
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn disconnect_releases_decoder_without_writing() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[MULTIPART_TYPE])).await;
        session.on_message(chunk(MULTIPART_BODY)).await;
        session.on_disconnect();

        assert!(session.is_closed());
        assert!(!session.has_active_decoder());
        assert!(recorder.statuses().is_empty());
        assert_eq!(recorder.closes(), 0);
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn events_after_close_are_dropped() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::PUT, "/x", &[])).await;
        session.on_message(request(Method::GET, "/x", &[])).await;
        session.on_message(chunk(b"late")).await;
        session.on_message(eof()).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::NOT_IMPLEMENTED]);
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn chunk_and_eof_without_upload_are_ignored() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(chunk(b"stray")).await;
        session.on_message(eof()).await;

        assert!(recorder.statuses().is_empty());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn second_header_during_upload_is_internal_error() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        session.on_message(request(Method::POST, "/upload", &[MULTIPART_TYPE])).await;
        session.on_message(chunk(MULTIPART_BODY)).await;
        session.on_message(request(Method::GET, "/report.pdf", &[])).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
        assert!(!session.has_active_decoder());
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn failure_after_commit_only_closes() {
        let fixture = Fixture::new();
        let (mut session, recorder) = fixture.session();

        let body = ChunkStream::new(&b"abc"[..], 10, 4);
        let response = Response::builder().status(StatusCode::OK).body(body).unwrap();
        let error = session.respond(response).await.unwrap_err();
        assert!(session.is_committed());

        session.finalize_error(error).await;

        assert_eq!(recorder.statuses(), vec![StatusCode::OK]);
        assert_eq!(recorder.recorded.lock().unwrap().eofs, 0);
        assert_eq!(recorder.closes(), 1);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn failing_error_response_is_swallowed() {
        let fixture = Fixture::new();
        let recorder = Recorder::failing();
        let mut session = ConnectionSession::new(Arc::new(fixture.config()), recorder.clone());

        session.on_message(request(Method::PUT, "/x", &[])).await;

        assert!(session.is_closed());
        assert!(recorder.statuses().is_empty());
        assert_eq!(recorder.closes(), 1);
    }

    #[tokio::test]
    async fn no_decoder_leaks_across_many_requests() {
        let fixture = Fixture::new();

        for i in 0..1000 {
            let (mut session, recorder) = fixture.session();
            session.on_message(request(Method::POST, "/upload", &[MULTIPART_TYPE])).await;
            session.on_message(chunk(&MULTIPART_BODY[..120])).await;

            let expected_closes = match i % 3 {
                0 => {
                    session.on_message(chunk(&MULTIPART_BODY[120..])).await;
                    session.on_message(eof()).await;
                    assert_eq!(recorder.statuses(), vec![StatusCode::OK]);
                    1
                }
                1 => {
                    let error = HttpError::from(micro_file_http::protocol::ParseError::invalid_body("reset"));
                    session.on_transport_error(&error).await;
                    assert_eq!(recorder.statuses(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
                    1
                }
                _ => {
                    session.on_disconnect();
                    assert!(recorder.statuses().is_empty());
                    0
                }
            };

            assert!(!session.has_active_decoder());
            assert!(session.is_closed());
            assert_eq!(recorder.closes(), expected_closes, "request {i}");
        }

        assert_eq!(fixture.spool_entries(), 0);
    }

    #[test]
    fn method_dispatch() {
        assert_eq!(RequestMethod::from(&Method::GET), RequestMethod::Get);
        assert_eq!(RequestMethod::from(&Method::POST), RequestMethod::Post);
        assert_eq!(RequestMethod::from(&Method::PATCH), RequestMethod::Other(Method::PATCH));
    }

    /// Runs one connection over an in-memory socket and returns everything the server
    /// wrote before closing.
    async fn exchange(config: SessionConfig, request: &[u8]) -> String {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_reader, server_writer) = tokio::io::split(server);
        let config = Arc::new(config);

        let connection = tokio::spawn(async move {
            HttpConnection::new(server_reader, server_writer)
                .process(|writer| ConnectionSession::new(config, writer))
                .await
        });

        let (mut client_reader, mut client_writer) = tokio::io::split(client);
        client_writer.write_all(request).await.unwrap();

        let mut response = Vec::new();
        client_reader.read_to_end(&mut response).await.unwrap();
        let _ = connection.await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn connection_download() {
        let fixture = Fixture::new();
        std::fs::write(fixture.root.path().join("report.pdf"), b"%PDF-1.4 17 bytes").unwrap();

        let request = indoc! {r##"
        GET /report.pdf HTTP/1.1
        Host: localhost

        "##};
        let response = exchange(fixture.config(), request.as_bytes()).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("content-length: 17\r\n"));
        assert!(response.contains("content-type: application/octet-stream\r\n"));
        assert!(response.contains("content-disposition: attachment; filename=\"report.pdf\"\r\n"));
        assert!(response.contains("connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\n%PDF-1.4 17 bytes"));
    }

    #[tokio::test]
    async fn connection_encoded_traversal() {
        let fixture = Fixture::new();
        let request = indoc! {r##"
        GET /..%2f..%2fetc%2fpasswd HTTP/1.1
        Host: localhost

        "##};
        let response = exchange(fixture.config(), request.as_bytes()).await;

        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{response}");
        assert!(response.contains("content-length: 0\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn connection_chunked_upload() {
        let fixture = Fixture::new();
        let mut request = indoc! {r##"
        POST /upload HTTP/1.1
        Host: localhost
        Content-Type: multipart/form-data; boundary=XyZ
        Transfer-Encoding: chunked

        "##}
        .as_bytes()
        .to_vec();
        for piece in MULTIPART_BODY.chunks(25) {
            request.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
            request.extend_from_slice(piece);
            request.extend_from_slice(b"\r\n");
        }
        request.extend_from_slice(b"0\r\n\r\n");

        let response = exchange(fixture.config(), &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("connection: close\r\n"));
        assert_eq!(fixture.spool_entries(), 0);
    }

    #[tokio::test]
    async fn connection_malformed_request() {
        let fixture = Fixture::new();
        let request = indoc! {r##"
        POST /upload HTTP/1.1
        Transfer-Encoding: chunked

        zz
        "##};
        let response = exchange(fixture.config(), request.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{response}");
    }

    #[tokio::test]
    async fn connection_unsupported_method() {
        let fixture = Fixture::new();
        let request = indoc! {r##"
        DELETE /report.pdf HTTP/1.1
        Host: localhost

        "##};
        let response = exchange(fixture.config(), request.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "{response}");
    }

    #[test]
    fn config_root_is_used_as_given() {
        let config = SessionConfig::new("/data");
        assert_eq!(config.root, Path::new("/data"));
    }
}
