//! ICAP response types.
//!
//! This module defines:
//! - [`StatusCode`]: ICAP status codes (RFC 3507), with an escape hatch for
//!   any other in-range code a server may send.
//! - [`Response`]: the value object assembled incrementally by
//!   [`ResponseParser`](crate::parser::ResponseParser) and returned, by
//!   value, from [`IcapConnection::receive`](crate::IcapConnection::receive).
//!
//! A [`Response`] has no back-reference to the connection and is safely
//! movable to the caller once the exchange completes.

use std::fmt;

use http::{HeaderMap, HeaderValue};

use crate::error::ProtocolError;
use crate::parser::http_embed::EmbeddedHead;
use crate::parser::{ParseEvent, ResponseParser};
use crate::request::Method;

/// ICAP status codes as defined in RFC 3507.
///
/// Any 100–599 code not named here parses as [`StatusCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Continue100,
    Ok200,
    NoContent204,
    PartialContent206,
    BadRequest400,
    Forbidden403,
    NotFound404,
    MethodNotAllowed405,
    RequestEntityTooLarge413,
    InternalServerError500,
    ServiceUnavailable503,
    GatewayTimeout504,
    Other(u16),
}

impl StatusCode {
    /// Map a numeric code. `None` outside the legal 100–599 range.
    pub fn from_u16(code: u16) -> Option<Self> {
        if !(100..=599).contains(&code) {
            return None;
        }
        Some(match code {
            100 => StatusCode::Continue100,
            200 => StatusCode::Ok200,
            204 => StatusCode::NoContent204,
            206 => StatusCode::PartialContent206,
            400 => StatusCode::BadRequest400,
            403 => StatusCode::Forbidden403,
            404 => StatusCode::NotFound404,
            405 => StatusCode::MethodNotAllowed405,
            413 => StatusCode::RequestEntityTooLarge413,
            500 => StatusCode::InternalServerError500,
            503 => StatusCode::ServiceUnavailable503,
            504 => StatusCode::GatewayTimeout504,
            other => StatusCode::Other(other),
        })
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue100 => 100,
            StatusCode::Ok200 => 200,
            StatusCode::NoContent204 => 204,
            StatusCode::PartialContent206 => 206,
            StatusCode::BadRequest400 => 400,
            StatusCode::Forbidden403 => 403,
            StatusCode::NotFound404 => 404,
            StatusCode::MethodNotAllowed405 => 405,
            StatusCode::RequestEntityTooLarge413 => 413,
            StatusCode::InternalServerError500 => 500,
            StatusCode::ServiceUnavailable503 => 503,
            StatusCode::GatewayTimeout504 => 504,
            StatusCode::Other(c) => *c,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A fully received ICAP response.
///
/// Immutable once the parser reaches its terminal state; the body is
/// whatever materialization policy the caller chose (the connection layer
/// accumulates [`BodyChunk`](crate::parser::ParseEvent::BodyChunk) events
/// into `body`).
#[derive(Debug, Clone)]
pub struct Response {
    /// Response status code.
    pub status_code: StatusCode,
    /// Reason phrase from the status line (may be multi-word).
    pub reason: String,
    /// ICAP headers. Duplicates are preserved in order of arrival.
    pub icap_headers: HeaderMap,
    /// Encapsulated HTTP header block, for REQMOD/RESPMOD verdicts.
    pub embedded: Option<EmbeddedHead>,
    /// Decoded (de-chunked) encapsulated body.
    pub body: Vec<u8>,
    /// Trailer headers from the terminal chunk, usually empty.
    pub trailers: HeaderMap,
}

impl Response {
    /// Parse a complete response held in memory, accumulating body chunks.
    ///
    /// `method` is the method of the request this responds to; it selects
    /// the legal `Encapsulated` section combinations. Mainly a convenience
    /// for tests and offline inspection; live connections feed the parser
    /// incrementally.
    pub fn parse(raw: &[u8], method: Method) -> Result<Self, ProtocolError> {
        let mut parser = ResponseParser::new(method);
        let mut body = Vec::new();
        let mut done = false;
        for ev in parser.feed(raw)? {
            match ev {
                ParseEvent::BodyChunk(chunk) => body.extend_from_slice(&chunk),
                ParseEvent::Done => done = true,
                _ => {}
            }
        }
        if !done {
            parser.finish()?;
        }
        let mut resp = parser.into_response()?;
        resp.body = body;
        Ok(resp)
    }

    /// Get an ICAP header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.icap_headers.get(name)
    }

    /// Check whether an ICAP header exists.
    pub fn has_header(&self, name: &str) -> bool {
        self.icap_headers.contains_key(name)
    }

    /// The mandatory `ISTag` header, if the server sent one.
    pub fn istag(&self) -> Option<&str> {
        self.get_header("istag").and_then(|v| v.to_str().ok())
    }

    /// Methods advertised in an OPTIONS response (`Methods` header).
    pub fn methods(&self) -> Vec<Method> {
        self.get_header("methods")
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                s.split(',')
                    .filter_map(|m| m.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Preview size advertised in an OPTIONS response (`Preview` header).
    pub fn preview_size(&self) -> Option<usize> {
        self.get_header("preview")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    }

    /// Whether the server allows `204 No Content` replies (`Allow` header).
    pub fn allows_204(&self) -> bool {
        self.get_header("allow")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').any(|p| p.trim() == "204"))
            .unwrap_or(false)
    }

    /// Whether the response indicates success (200 or 204).
    pub fn is_success(&self) -> bool {
        matches!(
            self.status_code,
            StatusCode::Ok200 | StatusCode::NoContent204
        )
    }

    /// Whether the content was left unmodified (204).
    pub fn is_no_modification(&self) -> bool {
        self.status_code == StatusCode::NoContent204
    }

    /// Whether the response indicates an error (4xx/5xx).
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.status_code.as_u16())
    }
}

impl fmt::Display for Response {
    /// Formats the response for debugging: status line, headers, body size.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ICAP/1.0 {} {}", self.status_code, self.reason)?;
        for (name, value) in self.icap_headers.iter() {
            writeln!(
                f,
                "{}: {}",
                name.as_str(),
                value.to_str().unwrap_or_default()
            )?;
        }
        if !self.body.is_empty() {
            writeln!(f, "[{} body bytes]", self.body.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(StatusCode::from_u16(204), Some(StatusCode::NoContent204));
        assert_eq!(StatusCode::from_u16(403), Some(StatusCode::Forbidden403));
        assert_eq!(StatusCode::from_u16(418), Some(StatusCode::Other(418)));
        assert_eq!(StatusCode::from_u16(600), None);
        assert_eq!(StatusCode::from_u16(99), None);
        assert_eq!(StatusCode::Forbidden403.to_string(), "403");
    }

    #[test]
    fn options_accessors() {
        let raw = b"ICAP/1.0 200 OK\r\n\
            Methods: RESPMOD, REQMOD\r\n\
            ISTag: \"policy-5\"\r\n\
            Preview: 1024\r\n\
            Allow: 204\r\n\
            Encapsulated: null-body=0\r\n\
            \r\n";
        let r = Response::parse(raw, Method::Options).expect("parse");
        assert_eq!(r.methods(), vec![Method::RespMod, Method::ReqMod]);
        assert_eq!(r.preview_size(), Some(1024));
        assert!(r.allows_204());
        assert_eq!(r.istag(), Some("\"policy-5\""));
        assert!(r.is_success());
        assert!(!r.is_error());
    }

    #[test]
    fn multiword_reason_phrase() {
        let raw = b"ICAP/1.0 405 Method Not Allowed\r\nEncapsulated: null-body=0\r\n\r\n";
        let r = Response::parse(raw, Method::Options).expect("parse");
        assert_eq!(r.status_code, StatusCode::MethodNotAllowed405);
        assert_eq!(r.reason, "Method Not Allowed");
        assert!(r.is_error());
    }

    #[test]
    fn duplicate_headers_preserved_in_order() {
        let raw = b"ICAP/1.0 200 OK\r\n\
            X-Note: first\r\n\
            X-Note: second\r\n\
            Encapsulated: null-body=0\r\n\
            \r\n";
        let r = Response::parse(raw, Method::Options).expect("parse");
        let all: Vec<_> = r.icap_headers.get_all("x-note").iter().collect();
        assert_eq!(all, vec!["first", "second"]);
    }
}
