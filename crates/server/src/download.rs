//! File download responses.
//!
//! A download is a `Response<ChunkStream<File>>`: the head is built from file metadata
//! and the body reads the file lazily, one fixed-size chunk at a time, so a download
//! never holds more than one chunk in memory.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tokio::fs::{self, File};
use tokio::io::AsyncRead;
use tokio_util::io::poll_read_buf;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::path::ResolvedPath;

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

pin_project! {
    /// A finite body that reads exactly `length` bytes from `reader` in chunks of
    /// `chunk_size` bytes (the last chunk may be shorter).
    ///
    /// If the reader ends before `length` bytes, the stream yields an
    /// [`io::ErrorKind::UnexpectedEof`] error instead of a short body. After the first
    /// error or the last chunk the stream is finished. It can not be restarted.
    #[derive(Debug)]
    pub struct ChunkStream<R> {
        #[pin]
        reader: R,
        buf: BytesMut,
        chunk_size: usize,
        remaining: u64,
        done: bool,
    }
}

impl<R: AsyncRead> ChunkStream<R> {
    pub fn new(reader: R, length: u64, chunk_size: usize) -> Self {
        Self { reader, buf: BytesMut::new(), chunk_size: chunk_size.max(1), remaining: length, done: length == 0 }
    }
}

impl<R: AsyncRead> Stream for ChunkStream<R> {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        let want = usize::try_from(*this.remaining).map_or(*this.chunk_size, |remaining| remaining.min(*this.chunk_size));
        this.buf.reserve(want - this.buf.len());

        // a partially filled chunk survives Pending in `buf`
        while this.buf.len() < want {
            let missing = want - this.buf.len();
            let result = ready!(poll_read_buf(this.reader.as_mut(), cx, &mut (&mut *this.buf).limit(missing)));
            match result {
                Ok(0) => {
                    *this.done = true;
                    let expected = *this.remaining - this.buf.len() as u64;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended with {expected} bytes still expected"),
                    ))));
                }
                Ok(_) => {}
                Err(e) => {
                    *this.done = true;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }

        *this.remaining -= want as u64;
        if *this.remaining == 0 {
            *this.done = true;
        }
        Poll::Ready(Some(Ok(this.buf.split().freeze())))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let chunks = self.remaining.div_ceil(self.chunk_size as u64);
        let chunks = usize::try_from(chunks).unwrap_or(usize::MAX);
        (chunks, Some(chunks))
    }
}

impl<R: AsyncRead> Body for ChunkStream<R> {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        if self.done { SizeHint::with_exact(0) } else { SizeHint::with_exact(self.remaining) }
    }
}

/// Opens the file at `path` and builds its download response.
///
/// Anything that is not an existing regular file is [`SessionError::NotFound`].
pub async fn file_response(path: &ResolvedPath, chunk_size: usize) -> Result<Response<ChunkStream<File>>, SessionError> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            debug!(path = ?path.as_path(), "no such file");
            return Err(SessionError::not_found(path.as_path()));
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() {
        debug!(path = ?path.as_path(), "not a regular file");
        return Err(SessionError::not_found(path.as_path()));
    }

    let file = File::open(path).await?;
    let length = metadata.len();
    let file_name = path.file_name().unwrap_or_default();
    info!(path = ?path.as_path(), size = length, "start download");

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.as_ref())
        .header(CONTENT_LENGTH, length)
        .header(CONTENT_DISPOSITION, content_disposition(&file_name)?)
        .body(ChunkStream::new(file, length, chunk_size))
        .map_err(SessionError::internal)
}

/// `attachment; filename="<name>"`, with `"` and `\` escaped.
fn content_disposition(file_name: &str) -> Result<HeaderValue, SessionError> {
    let mut value = String::with_capacity(file_name.len() + 24);
    value.push_str("attachment; filename=\"");
    for c in file_name.chars() {
        if matches!(c, '"' | '\\') {
            value.push('\\');
        }
        value.push(c);
    }
    value.push('"');

    HeaderValue::from_bytes(value.as_bytes()).map_err(SessionError::internal)
}
