//! Decoded request head.

use http::header::EXPECT;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// The request line and header fields of one request.
///
/// Wraps `http::Request<()>`; the body arrives separately as payload messages.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether a body may follow this head. Bodies of GET, HEAD, DELETE, OPTIONS
    /// and CONNECT requests are not read.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether the client waits for `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(EXPECT)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(method: Method, expect: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().method(method).uri("/upload");
        if let Some(expect) = expect {
            builder = builder.header(EXPECT, expect);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn need_body_by_method() {
        assert!(!header(Method::GET, None).need_body());
        assert!(!header(Method::HEAD, None).need_body());
        assert!(header(Method::POST, None).need_body());
        assert!(header(Method::PUT, None).need_body());
    }

    #[test]
    fn expect_continue_is_case_insensitive() {
        assert!(header(Method::POST, Some("100-continue")).expects_continue());
        assert!(header(Method::POST, Some("100-Continue")).expects_continue());
        assert!(!header(Method::POST, Some("200-ok")).expects_continue());
        assert!(!header(Method::POST, None).expects_continue());
    }
}
