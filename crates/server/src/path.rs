//! Resource path decoding and resolution under the upload root.
//!
//! The whole request target, query included, is percent-decoded (`%XX` escapes as UTF-8,
//! `+` as a space) and checked for the literal traversal pattern `../`. Only the path is
//! then joined to the root. The check is a substring test on the decoded string and
//! nothing more: `..\`, a trailing `/..` and similar sequences are not caught.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use http::Uri;
use thiserror::Error;

/// The literal sequence whose presence in a decoded path rejects the request.
pub const TRAVERSAL_PATTERN: &str = "../";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path contains a parent directory traversal: {decoded}")]
    Traversal { decoded: String },

    #[error("malformed percent escape at byte {position}")]
    MalformedEscape { position: usize },
}

/// A request path joined under the upload root. Computed per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
}

impl ResolvedPath {
    /// Rejects traversal anywhere in the decoded target of `uri`, then joins its
    /// decoded path to `root`.
    ///
    /// Leading slashes are stripped before joining so an absolute request path cannot
    /// replace `root`.
    pub fn resolve(root: &Path, uri: &Uri) -> Result<Self, PathError> {
        let target = uri.path_and_query().map_or_else(|| uri.path(), |target| target.as_str());
        let decoded_target = percent_decode(target)?;
        if contains_traversal(&decoded_target) {
            return Err(PathError::Traversal { decoded: decoded_target });
        }

        let decoded = percent_decode(uri.path())?;
        let relative = decoded.trim_start_matches('/');
        Ok(Self { path: root.join(relative) })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The last path component, used for the download file name.
    pub fn file_name(&self) -> Option<Cow<'_, str>> {
        self.path.file_name().map(|name| name.to_string_lossy())
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

#[inline]
pub fn contains_traversal(decoded: &str) -> bool {
    decoded.contains(TRAVERSAL_PATTERN)
}

/// Decodes `%XX` escapes and `+` the way HTML form decoding does.
///
/// Escaped bytes are collected and read as UTF-8; invalid sequences become U+FFFD.
/// A `%` that is not followed by two hex digits is an error.
pub fn percent_decode(input: &str) -> Result<String, PathError> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let high = bytes.get(i + 1).copied().and_then(hex_value);
                let low = bytes.get(i + 2).copied().and_then(hex_value);
                let (Some(high), Some(low)) = (high, low) else {
                    return Err(PathError::MalformedEscape { position: i });
                };
                decoded.push((high << 4) | low);
                i += 3;
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }

    Ok(match String::from_utf8(decoded) {
        Ok(decoded) => decoded,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn hex_value(b: u8) -> Option<u8> {
    char::from(b).to_digit(16).and_then(|digit| u8::try_from(digit).ok())
}
