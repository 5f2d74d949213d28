use std::convert::Infallible;
use std::io;
use std::path::PathBuf;

use http::{Method, StatusCode};
use micro_file_http::protocol::SendError;
use thiserror::Error;

use crate::path::PathError;
use crate::upload::UploadError;

/// Everything that can end a request inside a session.
///
/// Each variant maps to exactly one status code; error responses carry no body.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("path rejected: {path}")]
    PathRejected { path: String },

    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("method not implemented: {method}")]
    NotImplemented { method: Method },

    #[error("upload error: {source}")]
    Upload {
        #[from]
        source: UploadError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("send error: {source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl SessionError {
    pub fn not_found<P: Into<PathBuf>>(path: P) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn internal<S: ToString>(str: S) -> Self {
        Self::Internal { reason: str.to_string() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PathRejected { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Upload { .. } | Self::Io { .. } | Self::Send { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<PathError> for SessionError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Traversal { decoded } => Self::PathRejected { path: decoded },
            e @ PathError::MalformedEscape { .. } => Self::internal(e),
        }
    }
}

impl From<Infallible> for SessionError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}
