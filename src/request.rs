//! ICAP request types.
//!
//! This module defines:
//! - [`Method`]: the three ICAP methods (`OPTIONS`, `REQMOD`, `RESPMOD`).
//! - [`EmbeddedHttp`]: the HTTP message carried inside a modification request.
//! - [`Request`]: the single public ICAP request type used by
//!   [`MessageBuilder`](crate::MessageBuilder) and
//!   [`IcapConnection`](crate::IcapConnection).
//!
//! A [`Request`] is built once with the fluent constructors and is immutable
//! once handed to the connection.
//!
//! # Example (REQMOD with embedded HTTP request)
//! ```rust
//! use http::Request as HttpRequest;
//! use icap_client::{Method, Request};
//!
//! let http_req = HttpRequest::builder()
//!     .method("GET")
//!     .uri("http://example.com/")
//!     .header("Host", "example.com")
//!     .body(Vec::new())
//!     .unwrap();
//!
//! let icap_req = Request::reqmod("avscan")
//!     .allow_204(true)
//!     .preview(4)
//!     .with_http_request(http_req);
//!
//! assert_eq!(icap_req.method, Method::ReqMod);
//! assert_eq!(icap_req.preview_size, Some(4));
//! ```

use std::fmt;
use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue, Request as HttpRequest, Response as HttpResponse};

/// ICAP method. Determines which encapsulated sections are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    ReqMod,
    RespMod,
}

impl Method {
    /// Wire token for the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::ReqMod => "REQMOD",
            Method::RespMod => "RESPMOD",
        }
    }

    /// True for REQMOD/RESPMOD.
    #[inline]
    pub fn is_mod(&self) -> bool {
        matches!(self, Method::ReqMod | Method::RespMod)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("OPTIONS") {
            Ok(Method::Options)
        } else if s.eq_ignore_ascii_case("REQMOD") {
            Ok(Method::ReqMod)
        } else if s.eq_ignore_ascii_case("RESPMOD") {
            Ok(Method::RespMod)
        } else {
            Err(format!("invalid ICAP method: {s}"))
        }
    }
}

/// Embedded HTTP message inside an ICAP request.
#[derive(Debug, Clone)]
pub enum EmbeddedHttp {
    /// Embedded HTTP request (typical for `REQMOD`).
    Req(HttpRequest<Vec<u8>>),
    /// Embedded HTTP response (typical for `RESPMOD`).
    Resp(HttpResponse<Vec<u8>>),
}

/// Single public ICAP request type.
///
/// Carries the ICAP method/service and the flags that influence how the
/// request is serialized on the wire (Preview, Allow: 204/206, `ieof`).
#[derive(Debug, Clone)]
pub struct Request {
    /// ICAP method.
    pub method: Method,
    /// Service path like `"avscan"`. Leading slash is allowed.
    pub service: String,
    /// ICAP headers (case-insensitive, duplicates preserved via `append`).
    pub icap_headers: HeaderMap,
    /// Optional embedded HTTP message (request/response).
    pub embedded: Option<EmbeddedHttp>,
    /// `Preview: n` (if set).
    pub preview_size: Option<usize>,
    /// Whether `Allow: 204` should be advertised.
    pub allow_204: bool,
    /// Whether `Allow: 206` should be advertised.
    pub allow_206: bool,
}

impl Request {
    /// Create a new ICAP request.
    pub fn new(method: Method, service: impl Into<String>) -> Self {
        Self {
            method,
            service: service.into(),
            icap_headers: HeaderMap::new(),
            embedded: None,
            preview_size: None,
            allow_204: false,
            allow_206: false,
        }
    }

    /// Construct an OPTIONS request.
    pub fn options(service: impl Into<String>) -> Self {
        Self::new(Method::Options, service)
    }
    /// Construct a REQMOD request.
    pub fn reqmod(service: impl Into<String>) -> Self {
        Self::new(Method::ReqMod, service)
    }
    /// Construct a RESPMOD request.
    pub fn respmod(service: impl Into<String>) -> Self {
        Self::new(Method::RespMod, service)
    }

    /// Set/override an ICAP header.
    ///
    /// # Panics
    /// Panics on names/values that are not valid header tokens; both are
    /// typically literals at the call site.
    pub fn icap_header(mut self, name: &str, value: &str) -> Self {
        let n: HeaderName = name.parse().expect("invalid ICAP header name");
        let v: HeaderValue = HeaderValue::from_str(value).expect("invalid ICAP header value");
        self.icap_headers.insert(n, v);
        self
    }

    /// Request preview negotiation with `n` preview bytes.
    pub fn preview(mut self, n: usize) -> Self {
        self.preview_size = Some(n);
        self
    }

    /// Advertise `Allow: 204`.
    pub fn allow_204(mut self, yes: bool) -> Self {
        self.allow_204 = yes;
        self
    }
    /// Advertise `Allow: 206`.
    pub fn allow_206(mut self, yes: bool) -> Self {
        self.allow_206 = yes;
        self
    }

    /// Attach an embedded HTTP request.
    pub fn with_http_request(mut self, req: HttpRequest<Vec<u8>>) -> Self {
        self.embedded = Some(EmbeddedHttp::Req(req));
        self
    }
    /// Attach an embedded HTTP response.
    pub fn with_http_response(mut self, resp: HttpResponse<Vec<u8>>) -> Self {
        self.embedded = Some(EmbeddedHttp::Resp(resp));
        self
    }
}
