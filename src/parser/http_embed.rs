//! Serialization and parsing of the HTTP messages embedded in ICAP
//! messages.
//!
//! Outgoing embedded HTTP is serialized from `http::Request`/`http::Response`
//! with the head and the body kept separate, since the `Encapsulated` header
//! needs the exact head length and the body goes on the wire chunk-encoded.
//! Incoming embedded heads are kept as a start line plus a `HeaderMap`
//! ([`HttpHead`]); the adapted body arrives separately through the chunk
//! decoder.

use std::fmt::Write as _;

use http::{HeaderMap, HeaderName, HeaderValue, Request as HttpRequest, Response as HttpResponse, Version};

use crate::error::ProtocolError;

/// An encapsulated HTTP header block: start line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    /// Request line or status line, without the trailing CRLF.
    pub start_line: String,
    pub headers: HeaderMap,
}

/// Which kind of HTTP head a response encapsulates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedHead {
    /// Adapted HTTP request (REQMOD verdict).
    Req(HttpHead),
    /// Adapted HTTP response (RESPMOD verdict, or a REQMOD error response).
    Resp(HttpHead),
}

impl EmbeddedHead {
    pub fn head(&self) -> &HttpHead {
        match self {
            EmbeddedHead::Req(h) | EmbeddedHead::Resp(h) => h,
        }
    }
}

pub(crate) fn http_version_str(v: Version) -> &'static str {
    match v {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Serialize an embedded HTTP request into (head bytes, body bytes).
/// The head includes its terminating blank line.
pub(crate) fn serialize_http_request(req: &HttpRequest<Vec<u8>>) -> (Vec<u8>, Vec<u8>) {
    let mut out = String::new();
    write!(
        &mut out,
        "{} {} {}\r\n",
        req.method(),
        req.uri(),
        http_version_str(req.version())
    )
    .unwrap();
    write_headers(&mut out, req.headers());
    out.push_str("\r\n");
    (out.into_bytes(), req.body().clone())
}

/// Serialize an embedded HTTP response into (head bytes, body bytes).
pub(crate) fn serialize_http_response(resp: &HttpResponse<Vec<u8>>) -> (Vec<u8>, Vec<u8>) {
    let mut out = String::new();
    let code = resp.status();
    write!(
        &mut out,
        "{} {} {}\r\n",
        http_version_str(resp.version()),
        code.as_u16(),
        code.canonical_reason().unwrap_or("")
    )
    .unwrap();
    write_headers(&mut out, resp.headers());
    out.push_str("\r\n");
    (out.into_bytes(), resp.body().clone())
}

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        write!(
            out,
            "{}: {}\r\n",
            name.as_str(),
            value.to_str().unwrap_or_default()
        )
        .unwrap();
    }
}

/// Parse an encapsulated HTTP head. `raw` is the exact byte range declared
/// by the `Encapsulated` offsets and must end with the blank line.
pub(crate) fn parse_http_head(raw: &[u8], is_request: bool) -> Result<EmbeddedHead, ProtocolError> {
    if !raw.ends_with(b"\r\n\r\n") {
        return Err(ProtocolError::InvalidEncapsulation(
            "declared HTTP header section does not end with CRLFCRLF".into(),
        ));
    }
    let text = std::str::from_utf8(&raw[..raw.len() - 2]).map_err(|_| {
        ProtocolError::MalformedHeader("encapsulated HTTP head is not valid UTF-8".into())
    })?;

    let mut lines = text.split("\r\n");
    let start_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ProtocolError::MalformedHeader("empty encapsulated HTTP head".into()))?
        .to_string();

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::MalformedHeader(format!(
                "HTTP header line without colon: {line}"
            )));
        };
        let n = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ProtocolError::MalformedHeader(format!("invalid HTTP header name: {name}")))?;
        let v = HeaderValue::from_str(value.trim())
            .map_err(|_| ProtocolError::MalformedHeader(format!("invalid HTTP header value for {name}")))?;
        headers.append(n, v);
    }

    let head = HttpHead {
        start_line,
        headers,
    };
    Ok(if is_request {
        EmbeddedHead::Req(head)
    } else {
        EmbeddedHead::Resp(head)
    })
}
