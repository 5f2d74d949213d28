//! Incremental `multipart/form-data` decoder.
//!
//! The body is fed in arbitrary pieces; delimiters split across pieces are found once
//! enough bytes have arrived. Part bodies are emitted as they are recognized, holding
//! back only the bytes that could still be the start of a delimiter.

use bytes::{Buf, Bytes, BytesMut};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::upload::UploadError;

/// Upper bound for the header block of a single part.
pub const MAX_PART_HEADER_BYTES: usize = 8 * 1024;
const MAX_PART_HEADERS: usize = 16;

/// Name, file name and content type of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHead {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PartEvent {
    Begin(PartHead),
    Data(Bytes),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    AfterDelimiter,
    Headers,
    Body,
    Epilogue,
}

#[derive(Debug)]
pub struct MultipartDecoder {
    /// `--boundary`
    dash_boundary: Vec<u8>,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    state: State,
}

impl MultipartDecoder {
    pub fn new(boundary: &str) -> Self {
        let mut dash_boundary = Vec::with_capacity(boundary.len() + 2);
        dash_boundary.extend_from_slice(b"--");
        dash_boundary.extend_from_slice(boundary.as_bytes());

        let mut delimiter = Vec::with_capacity(dash_boundary.len() + 2);
        delimiter.extend_from_slice(b"\r\n");
        delimiter.extend_from_slice(&dash_boundary);

        Self { dash_boundary, delimiter, state: State::Preamble }
    }

    /// Whether the closing delimiter has been seen.
    pub fn is_finished(&self) -> bool {
        self.state == State::Epilogue
    }

    fn decode_preamble(&mut self, src: &mut BytesMut) {
        if src.starts_with(&self.dash_boundary) {
            src.advance(self.dash_boundary.len());
            self.state = State::AfterDelimiter;
            return;
        }
        if src.len() < self.dash_boundary.len() && self.dash_boundary.starts_with(src) {
            return;
        }

        if let Some(index) = find(src, &self.delimiter) {
            src.advance(index + self.delimiter.len());
            self.state = State::AfterDelimiter;
        } else {
            let keep = self.delimiter.len() - 1;
            if src.len() > keep {
                src.advance(src.len() - keep);
            }
        }
    }

    fn decode_after_delimiter(&mut self, src: &mut BytesMut) -> Result<bool, UploadError> {
        // transport padding
        let padding = src.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
        src.advance(padding);

        if src.len() < 2 {
            return Ok(false);
        }
        match &src[..2] {
            b"--" => {
                src.advance(2);
                trace!("closing delimiter");
                self.state = State::Epilogue;
            }
            b"\r\n" => {
                src.advance(2);
                self.state = State::Headers;
            }
            _ => return Err(UploadError::invalid_multipart("unexpected bytes after boundary")),
        }
        Ok(true)
    }

    fn decode_headers(&mut self, src: &mut BytesMut) -> Result<Option<PartEvent>, UploadError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (length, head) = match httparse::parse_headers(&src[..], &mut headers) {
            Ok(Status::Complete((length, headers))) => (length, part_head(headers)?),
            Ok(Status::Partial) => {
                if src.len() > MAX_PART_HEADER_BYTES {
                    return Err(UploadError::TooLargePartHeader { max_size: MAX_PART_HEADER_BYTES });
                }
                return Ok(None);
            }
            Err(e) => return Err(UploadError::invalid_multipart(e)),
        };

        if length > MAX_PART_HEADER_BYTES {
            return Err(UploadError::TooLargePartHeader { max_size: MAX_PART_HEADER_BYTES });
        }

        src.advance(length);
        self.state = State::Body;
        trace!(name = %head.name, file_name = ?head.file_name, "part begin");
        Ok(Some(PartEvent::Begin(head)))
    }

    fn decode_body(&mut self, src: &mut BytesMut) -> Option<PartEvent> {
        match find(src, &self.delimiter) {
            Some(0) => {
                src.advance(self.delimiter.len());
                self.state = State::AfterDelimiter;
                Some(PartEvent::End)
            }
            Some(index) => Some(PartEvent::Data(src.split_to(index).freeze())),
            None => {
                let safe = src.len().saturating_sub(self.delimiter.len() - 1);
                (safe > 0).then(|| PartEvent::Data(src.split_to(safe).freeze()))
            }
        }
    }
}

impl Decoder for MultipartDecoder {
    type Item = PartEvent;
    type Error = UploadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Preamble => {
                    self.decode_preamble(src);
                    if self.state == State::Preamble {
                        return Ok(None);
                    }
                }
                State::AfterDelimiter => {
                    if !self.decode_after_delimiter(src)? {
                        return Ok(None);
                    }
                }
                State::Headers => return self.decode_headers(src),
                State::Body => return Ok(self.decode_body(src)),
                State::Epilogue => {
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }
}

fn part_head(headers: &[httparse::Header<'_>]) -> Result<PartHead, UploadError> {
    let mut disposition = None;
    let mut content_type = None;

    for header in headers {
        if header.name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(String::from_utf8_lossy(header.value));
        } else if header.name.eq_ignore_ascii_case("content-type") {
            content_type = Some(String::from_utf8_lossy(header.value).trim().to_string());
        }
    }

    let disposition = disposition.ok_or_else(|| UploadError::invalid_multipart("part without content-disposition"))?;
    let mut params = parameters(&disposition);

    let kind = params.next().map(|(kind, _)| kind).unwrap_or_default();
    if !kind.eq_ignore_ascii_case("form-data") {
        return Err(UploadError::invalid_multipart(format!("unsupported disposition: {kind}")));
    }

    let mut name = None;
    let mut file_name = None;
    for (key, value) in params {
        if key.eq_ignore_ascii_case("name") {
            name = value;
        } else if key.eq_ignore_ascii_case("filename") {
            file_name = value;
        }
    }

    let name = name.ok_or_else(|| UploadError::invalid_multipart("part without a name"))?;
    Ok(PartHead { name, file_name, content_type })
}

/// Splits `form-data; name="a"; filename="b.txt"` into `(key, value)` pairs.
///
/// Quoted values may contain `;` and backslash escapes. The first item is the
/// disposition type with no value.
fn parameters(input: &str) -> impl Iterator<Item = (String, Option<String>)> + '_ {
    let mut rest = input;
    std::iter::from_fn(move || {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        if rest.is_empty() {
            return None;
        }

        let key_end = rest.find(['=', ';']).unwrap_or(rest.len());
        let key = rest[..key_end].trim().to_string();
        rest = &rest[key_end..];

        let Some(after_eq) = rest.strip_prefix('=') else {
            return Some((key, None));
        };
        let after_eq = after_eq.trim_start();

        if let Some(quoted) = after_eq.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut end = quoted.len();
            while let Some((index, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = index + 1;
                        break;
                    }
                    c => value.push(c),
                }
            }
            rest = &quoted[end..];
            Some((key, Some(value)))
        } else {
            let value_end = after_eq.find(';').unwrap_or(after_eq.len());
            let value = after_eq[..value_end].trim().to_string();
            rest = &after_eq[value_end..];
            Some((key, Some(value)))
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
