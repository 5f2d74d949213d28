//! Upload body decoding.
//!
//! An [`UploadDecoder`] is created for one POST request, is offered every body chunk in
//! order, and is finished at the end of the body. Its lifecycle is strict:
//!
//! - it is never reused for another request
//! - [`UploadDecoder::destroy`] releases every field and deletes every spool file; it
//!   is idempotent, and dropping the decoder calls it too
//!
//! `multipart/form-data` bodies are decoded incrementally by [`MultipartDecoder`].
//! `application/x-www-form-urlencoded` bodies, and bodies without a content type, are
//! buffered up to the spill threshold and parsed when finished. Any other body is kept
//! as a single opaque field that spills to disk like a multipart file part.

mod multipart;
mod storage;

pub use multipart::MAX_PART_HEADER_BYTES;
pub use multipart::MultipartDecoder;
pub use multipart::PartEvent;
pub use multipart::PartHead;
pub use storage::FieldData;

use std::io;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use micro_file_http::protocol::RequestHeader;
use thiserror::Error;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

pub const DEFAULT_SPILL_THRESHOLD: usize = 16 * 1024;

/// Where and when decoded fields move to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub spool_dir: PathBuf,
    /// A field larger than this many bytes is spilled to a spool file.
    pub spill_threshold: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { spool_dir: std::env::temp_dir(), spill_threshold: DEFAULT_SPILL_THRESHOLD }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("multipart content type without boundary")]
    MissingBoundary,

    #[error("invalid multipart body: {reason}")]
    InvalidMultipart { reason: String },

    #[error("part header size exceed the limit {max_size}")]
    TooLargePartHeader { max_size: usize },

    #[error("url-encoded body size exceed the limit {max_size}")]
    TooLargeForm { max_size: usize },

    #[error("multipart body ended before the closing boundary")]
    Incomplete,

    #[error("invalid url-encoded body: {source}")]
    InvalidUrlEncoded {
        #[from]
        source: serde_urlencoded::de::Error,
    },

    #[error("upload decoder already destroyed")]
    Destroyed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl UploadError {
    pub fn invalid_multipart<S: ToString>(str: S) -> Self {
        Self::InvalidMultipart { reason: str.to_string() }
    }
}

/// What was decoded for one form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: u64,
    pub spilled: bool,
}

#[derive(Debug)]
struct Field {
    head: PartHead,
    data: FieldData,
}

impl Field {
    fn summary(&self) -> FieldSummary {
        FieldSummary {
            name: self.head.name.clone(),
            file_name: self.head.file_name.clone(),
            content_type: self.head.content_type.clone(),
            size: self.data.size(),
            spilled: self.data.is_spilled(),
        }
    }
}

#[derive(Debug)]
enum Kind {
    Multipart { decoder: MultipartDecoder, buf: BytesMut, current: Option<Field> },
    UrlEncoded { body: BytesMut },
    Raw { field: Field },
    Released,
}

/// Field name reported for a body that is neither multipart nor url-encoded.
pub const RAW_FIELD_NAME: &str = "body";

/// Decodes one request body into form fields.
#[derive(Debug)]
pub struct UploadDecoder {
    kind: Kind,
    fields: Vec<Field>,
    config: UploadConfig,
}

impl UploadDecoder {
    /// Picks a decoder from the request `Content-Type`.
    pub fn new(header: &RequestHeader, config: &UploadConfig) -> Result<Self, UploadError> {
        let content_type = header.headers().get(CONTENT_TYPE).map(|value| String::from_utf8_lossy(value.as_bytes()));

        let kind = match content_type.as_deref().map(|value| (value, value.parse::<mime::Mime>().ok())) {
            None => {
                debug!("url-encoded upload without content type");
                Kind::UrlEncoded { body: BytesMut::new() }
            }
            Some((_, Some(mime))) if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA => {
                let boundary = mime.get_param(mime::BOUNDARY).ok_or(UploadError::MissingBoundary)?;
                debug!(boundary = %boundary, "multipart upload");
                Kind::Multipart { decoder: MultipartDecoder::new(boundary.as_str()), buf: BytesMut::new(), current: None }
            }
            Some((_, Some(mime))) if mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() => {
                debug!("url-encoded upload");
                Kind::UrlEncoded { body: BytesMut::new() }
            }
            Some((value, _)) => {
                debug!(content_type = %value, "opaque upload");
                let head = PartHead { name: RAW_FIELD_NAME.to_string(), file_name: None, content_type: Some(value.to_string()) };
                Kind::Raw { field: Field { head, data: FieldData::new(config) } }
            }
        };

        Ok(Self { kind, fields: vec![], config: config.clone() })
    }

    /// Feeds the next body chunk.
    pub async fn offer(&mut self, chunk: Bytes) -> Result<(), UploadError> {
        let Self { kind, fields, config } = self;
        match kind {
            Kind::Released => Err(UploadError::Destroyed),

            Kind::UrlEncoded { body } => {
                if body.len() + chunk.len() > config.spill_threshold {
                    return Err(UploadError::TooLargeForm { max_size: config.spill_threshold });
                }
                body.extend_from_slice(&chunk);
                Ok(())
            }

            Kind::Raw { field } => Ok(field.data.write(&chunk, config).await?),

            Kind::Multipart { decoder, buf, current } => {
                buf.extend_from_slice(&chunk);
                while let Some(event) = decoder.decode(buf)? {
                    match event {
                        PartEvent::Begin(head) => {
                            *current = Some(Field { head, data: FieldData::new(config) });
                        }
                        PartEvent::Data(data) => {
                            let field = current.as_mut().ok_or_else(|| UploadError::invalid_multipart("data outside a part"))?;
                            field.data.write(&data, config).await?;
                        }
                        PartEvent::End => {
                            let mut field = current.take().ok_or_else(|| UploadError::invalid_multipart("end outside a part"))?;
                            field.data.complete().await?;
                            trace!(name = %field.head.name, size = field.data.size(), "field decoded");
                            fields.push(field);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Completes decoding and reports the decoded fields. Does not release them; call
    /// [`destroy`](Self::destroy) afterwards.
    pub async fn finish(&mut self) -> Result<Vec<FieldSummary>, UploadError> {
        match &mut self.kind {
            Kind::Released => Err(UploadError::Destroyed),

            Kind::Multipart { decoder, .. } => {
                if !decoder.is_finished() {
                    return Err(UploadError::Incomplete);
                }
                Ok(self.fields.iter().map(Field::summary).collect())
            }

            Kind::UrlEncoded { body } => {
                let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&body[..])?;
                Ok(pairs
                    .into_iter()
                    .map(|(name, value)| FieldSummary {
                        name,
                        file_name: None,
                        content_type: None,
                        size: value.len() as u64,
                        spilled: false,
                    })
                    .collect())
            }

            Kind::Raw { field } => {
                field.data.complete().await?;
                Ok(vec![field.summary()])
            }
        }
    }

    /// Releases all decoded data and spool files. Returns `false` if the decoder was
    /// already destroyed.
    pub fn destroy(&mut self) -> bool {
        if matches!(self.kind, Kind::Released) {
            return false;
        }
        self.kind = Kind::Released;
        self.fields.clear();
        true
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self.kind, Kind::Released)
    }
}

impl Drop for UploadDecoder {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            debug!("upload decoder dropped before destroy");
            self.destroy();
        }
    }
}
