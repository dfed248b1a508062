//! Serialization of an outgoing ICAP request.
//!
//! [`MessageBuilder`] turns a [`Request`] plus an [`Authority`] into the
//! exact byte sequence for the wire. The `Encapsulated` offsets are computed
//! from the serialized embedded HTTP head *before* any byte is emitted; the
//! server does not re-derive them.
//!
//! Building performs no I/O. The result is a [`BuiltMessage`]: the bytes up
//! to and including the preview (or the whole body when no preview was
//! requested), plus the body remainder to send after `100 Continue`.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::error::BuildError;
use crate::parser::encap::Encapsulated;
use crate::parser::http_embed::{serialize_http_request, serialize_http_response};
use crate::parser::wire::{encode_chunk, encode_terminal};
use crate::request::{EmbeddedHttp, Method, Request};
use crate::{DEFAULT_PORT, ICAP_VERSION};

/// Host and port of the ICAP server, used for the request URI and the
/// mandatory `Host` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub host: String,
    pub port: u16,
}

impl Authority {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Authority on the default ICAP port (1344).
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PORT)
    }

    /// Parse `icap://host[:port][/...]`.
    pub fn parse(uri: &str) -> Result<Self, BuildError> {
        let rest = uri
            .trim()
            .strip_prefix("icap://")
            .ok_or_else(|| BuildError::InvalidAuthority(uri.to_string()))?;
        let authority = rest.split('/').next().unwrap_or(rest);
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse()
                    .map_err(|_| BuildError::InvalidAuthority(authority.to_string()))?;
                (h, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(BuildError::InvalidAuthority(uri.to_string()));
        }
        Ok(Self::new(host, port))
    }

    fn uri_for(&self, service: &str) -> String {
        format!(
            "icap://{}:{}/{}",
            self.host,
            self.port,
            service.strip_prefix('/').unwrap_or(service)
        )
    }
}

/// A fully serialized request, ready to write.
#[derive(Debug, Clone)]
pub struct BuiltMessage {
    /// Request line, headers, embedded head, and body up to the end of the
    /// preview (or the whole chunked body when no preview was requested).
    pub bytes: Vec<u8>,
    /// True when the preview left body bytes behind and the server is
    /// expected to answer `100 Continue` or short-circuit with 204.
    pub expect_continue: bool,
    /// Body bytes withheld by the preview, to be chunk-encoded after a
    /// `100 Continue`.
    pub remaining_body: Option<Vec<u8>>,
}

/// Assembles the outgoing bytes for one [`Request`].
#[derive(Debug)]
pub struct MessageBuilder<'a> {
    request: &'a Request,
    authority: &'a Authority,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(request: &'a Request, authority: &'a Authority) -> Self {
        Self { request, authority }
    }

    /// Produce the wire bytes. Rejects structurally invalid requests before
    /// a single byte is emitted.
    pub fn build(&self) -> Result<BuiltMessage, BuildError> {
        let req = self.request;

        reject_crlf("service", &req.service)?;
        for (name, value) in req.icap_headers.iter() {
            if value.as_bytes().contains(&b'\r') || value.as_bytes().contains(&b'\n') {
                return Err(BuildError::HeaderInjection(name.as_str().to_string()));
            }
        }

        let embedded = match (&req.method, &req.embedded) {
            (Method::Options, Some(_)) => {
                return Err(BuildError::InvalidSectionCombination {
                    method: req.method,
                    section: "encapsulated HTTP message",
                });
            }
            (Method::ReqMod, Some(EmbeddedHttp::Resp(_))) => {
                return Err(BuildError::InvalidSectionCombination {
                    method: req.method,
                    section: "res-hdr",
                });
            }
            (Method::RespMod, Some(EmbeddedHttp::Req(_))) => {
                return Err(BuildError::InvalidSectionCombination {
                    method: req.method,
                    section: "req-hdr",
                });
            }
            (_, emb) => emb.as_ref(),
        };

        // Serialize the embedded head first: its exact length feeds the
        // Encapsulated offsets.
        let (head, body) = match embedded {
            Some(EmbeddedHttp::Req(r)) => serialize_http_request(r),
            Some(EmbeddedHttp::Resp(r)) => serialize_http_response(r),
            None => (Vec::new(), Vec::new()),
        };

        let mut enc = Encapsulated::default();
        match embedded {
            Some(EmbeddedHttp::Req(_)) => {
                enc.req_hdr = Some(0);
                if body.is_empty() {
                    enc.null_body = Some(head.len());
                } else {
                    enc.req_body = Some(head.len());
                }
            }
            Some(EmbeddedHttp::Resp(_)) => {
                enc.res_hdr = Some(0);
                if body.is_empty() {
                    enc.null_body = Some(head.len());
                } else {
                    enc.res_body = Some(head.len());
                }
            }
            None => enc.null_body = Some(0),
        }

        let mut out = Vec::with_capacity(256 + head.len() + body.len());
        let mut text = String::with_capacity(256);
        write!(
            &mut text,
            "{} {} {}\r\n",
            req.method,
            self.authority.uri_for(&req.service),
            ICAP_VERSION
        )
        .unwrap();

        if !req.icap_headers.contains_key("host") {
            write!(&mut text, "Host: {}\r\n", self.authority.host).unwrap();
        }
        if !req.icap_headers.contains_key("user-agent") {
            write!(&mut text, "User-Agent: icap-client/{}\r\n", crate::VERSION).unwrap();
        }
        for (name, value) in req.icap_headers.iter() {
            // Encapsulated and Preview are derived from the request below; a
            // caller-supplied copy would duplicate them on the wire.
            if matches!(name.as_str(), "encapsulated" | "preview") {
                continue;
            }
            let value = value
                .to_str()
                .map_err(|_| BuildError::NonUtf8HeaderValue(name.as_str().to_string()))?;
            write!(
                &mut text,
                "{}: {}\r\n",
                canon_icap_header(name.as_str()),
                value
            )
            .unwrap();
        }
        if req.method.is_mod() {
            let allow = allow_value(req.allow_204, req.allow_206);
            if !allow.is_empty() && !req.icap_headers.contains_key("allow") {
                write!(&mut text, "Allow: {allow}\r\n").unwrap();
            }
            // A Preview header commits us to sending preview chunks; without
            // a body section there are none, so the header must not go out.
            if let Some(n) = req.preview_size
                && !body.is_empty()
            {
                write!(&mut text, "Preview: {n}\r\n").unwrap();
            }
        }
        write!(&mut text, "Encapsulated: {}\r\n\r\n", enc.header_value()).unwrap();

        out.extend_from_slice(text.as_bytes());
        out.extend_from_slice(&head);

        // The body follows the head immediately, chunk-encoded; the preview
        // decides how much goes out now.
        if body.is_empty() {
            return Ok(BuiltMessage {
                bytes: out,
                expect_continue: false,
                remaining_body: None,
            });
        }
        let (expect_continue, remaining) = append_preview_and_chunks(
            &mut out,
            if req.method.is_mod() {
                req.preview_size
            } else {
                None
            },
            body,
        );
        Ok(BuiltMessage {
            bytes: out,
            expect_continue,
            remaining_body: remaining,
        })
    }
}

/// Chunk the body according to the preview size. Returns whether a
/// `100 Continue` is expected and the withheld remainder.
fn append_preview_and_chunks(
    out: &mut Vec<u8>,
    preview_size: Option<usize>,
    body: Vec<u8>,
) -> (bool, Option<Vec<u8>>) {
    match preview_size {
        None => {
            encode_chunk(out, &body);
            encode_terminal(out, false);
            (false, None)
        }
        Some(ps) => {
            let send_n = body.len().min(ps);
            if send_n > 0 {
                encode_chunk(out, &body[..send_n]);
            }
            if send_n == body.len() {
                // The preview covered the whole body.
                encode_terminal(out, true);
                (false, None)
            } else {
                encode_terminal(out, false);
                (true, Some(body[send_n..].to_vec()))
            }
        }
    }
}

fn allow_value(allow_204: bool, allow_206: bool) -> &'static str {
    match (allow_204, allow_206) {
        (true, true) => "204, 206",
        (true, false) => "204",
        (false, true) => "206",
        (false, false) => "",
    }
}

fn reject_crlf(what: &str, s: &str) -> Result<(), BuildError> {
    if s.contains('\r') || s.contains('\n') || s.contains(' ') {
        return Err(BuildError::HeaderInjection(format!("{what}: {s}")));
    }
    Ok(())
}

/// Canonical ICAP header name (title-cased, with special cases). Input is
/// lowercase (`http::HeaderName::as_str()` already is).
fn canon_icap_header(name: &str) -> Cow<'_, str> {
    match name {
        "istag" => Cow::Borrowed("ISTag"),
        "encapsulated" => Cow::Borrowed("Encapsulated"),
        "options-ttl" => Cow::Borrowed("Options-TTL"),
        "x-client-ip" => Cow::Borrowed("X-Client-IP"),
        _ => {
            let mut out = String::with_capacity(name.len());
            for (i, seg) in name.split('-').enumerate() {
                if i > 0 {
                    out.push('-');
                }
                let mut chars = seg.chars();
                if let Some(c0) = chars.next() {
                    out.extend(c0.to_uppercase());
                    out.extend(chars);
                }
            }
            Cow::Owned(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request as HttpRequest;

    fn authority() -> Authority {
        Authority::new("av.example", 1344)
    }

    #[test]
    fn authority_parse_forms() {
        assert_eq!(
            Authority::parse("icap://av.example/srv").unwrap(),
            Authority::new("av.example", 1344)
        );
        assert_eq!(
            Authority::parse("icap://av.example:11344").unwrap(),
            Authority::new("av.example", 11344)
        );
        assert!(Authority::parse("http://av.example").is_err());
        assert!(Authority::parse("icap://:1344").is_err());
    }

    #[test]
    fn options_request_has_null_body() {
        let req = Request::options("srv");
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        assert!(text.starts_with("OPTIONS icap://av.example:1344/srv ICAP/1.0\r\n"));
        assert!(text.contains("Host: av.example\r\n"));
        assert!(text.contains("Encapsulated: null-body=0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!built.expect_continue);
    }

    #[test]
    fn reqmod_offsets_match_head_length() {
        let http_req = HttpRequest::builder()
            .method("GET")
            .uri("http://origin.example/")
            .header("Host", "origin.example")
            .body(b"payload".to_vec())
            .unwrap();
        let req = Request::reqmod("scan").with_http_request(http_req);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8_lossy(&built.bytes);

        let enc_line = text
            .lines()
            .find(|l| l.starts_with("Encapsulated:"))
            .expect("Encapsulated header present");
        let enc = Encapsulated::parse(enc_line.strip_prefix("Encapsulated:").unwrap()).unwrap();
        assert_eq!(enc.req_hdr, Some(0));

        // The declared body offset is the encapsulated head's byte length.
        let icap_end = text.find("\r\n\r\n").unwrap() + 4;
        let encapsulated = &built.bytes[icap_end..];
        let head_len = enc.req_body.unwrap();
        assert!(encapsulated[..head_len].ends_with(b"\r\n\r\n"));
        assert!(encapsulated[head_len..].starts_with(b"7\r\npayload\r\n"));
    }

    #[test]
    fn embedded_without_body_declares_null_body() {
        let http_req = HttpRequest::builder()
            .method("GET")
            .uri("http://origin.example/")
            .body(Vec::new())
            .unwrap();
        let req = Request::reqmod("scan").with_http_request(http_req);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        assert!(text.contains("Encapsulated: req-hdr=0, null-body="));
        // No chunked data after the head.
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn preview_splits_body_and_expects_continue() {
        let http_req = HttpRequest::builder()
            .method("POST")
            .uri("http://origin.example/upload")
            .body(b"0123456789".to_vec())
            .unwrap();
        let req = Request::reqmod("scan").preview(4).with_http_request(http_req);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8_lossy(&built.bytes);
        assert!(text.contains("Preview: 4\r\n"));
        assert!(built.bytes.ends_with(b"4\r\n0123\r\n0\r\n\r\n"));
        assert!(built.expect_continue);
        assert_eq!(built.remaining_body.as_deref(), Some(&b"456789"[..]));
    }

    #[test]
    fn preview_covering_whole_body_sends_ieof() {
        let http_req = HttpRequest::builder()
            .method("POST")
            .uri("http://origin.example/upload")
            .body(b"tiny".to_vec())
            .unwrap();
        let req = Request::reqmod("scan")
            .preview(1024)
            .with_http_request(http_req);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        assert!(built.bytes.ends_with(b"4\r\ntiny\r\n0; ieof\r\n\r\n"));
        assert!(!built.expect_continue);
        assert!(built.remaining_body.is_none());
    }

    #[test]
    fn zero_preview_withholds_entire_body() {
        let http_req = HttpRequest::builder()
            .method("POST")
            .uri("http://origin.example/upload")
            .body(b"virus?".to_vec())
            .unwrap();
        let req = Request::reqmod("scan").preview(0).with_http_request(http_req);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        assert!(built.bytes.ends_with(b"\r\n\r\n0\r\n\r\n"));
        assert!(built.expect_continue);
        assert_eq!(built.remaining_body.as_deref(), Some(&b"virus?"[..]));
    }

    #[test]
    fn illegal_section_combinations_rejected() {
        let http_resp = http::Response::builder().status(200).body(Vec::new()).unwrap();
        let req = Request::reqmod("scan").with_http_response(http_resp);
        assert!(matches!(
            MessageBuilder::new(&req, &authority()).build(),
            Err(BuildError::InvalidSectionCombination {
                method: Method::ReqMod,
                section: "res-hdr"
            })
        ));

        let http_req = HttpRequest::builder().body(Vec::new()).unwrap();
        let req = Request::options("srv").with_http_request(http_req);
        assert!(matches!(
            MessageBuilder::new(&req, &authority()).build(),
            Err(BuildError::InvalidSectionCombination { .. })
        ));
    }

    #[test]
    fn service_with_crlf_rejected() {
        let req = Request::options("srv\r\nEvil: yes");
        assert!(matches!(
            MessageBuilder::new(&req, &authority()).build(),
            Err(BuildError::HeaderInjection(_))
        ));
    }

    #[test]
    fn preview_suppressed_without_body_section() {
        let http_resp = http::Response::builder()
            .status(200)
            .header("Content-Length", "0")
            .body(Vec::new())
            .unwrap();
        let req = Request::respmod("scan").preview(64).with_http_response(http_resp);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        // null-body means no chunk section follows; advertising a preview
        // would leave the server waiting for chunks that never come.
        assert!(text.contains("null-body="));
        assert!(!text.contains("Preview:"));
        assert!(!built.expect_continue);

        let req = Request::respmod("scan").preview(64);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        assert!(!text.contains("Preview:"));
    }

    #[test]
    fn caller_copies_of_derived_headers_not_duplicated() {
        let req = Request::options("srv")
            .icap_header("Encapsulated", "null-body=99")
            .icap_header("Preview", "8");
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        assert_eq!(text.matches("Encapsulated:").count(), 1);
        assert!(text.contains("Encapsulated: null-body=0\r\n"));
        assert!(!text.contains("Preview:"));
    }

    #[test]
    fn non_utf8_header_value_rejected() {
        let mut req = Request::options("srv");
        req.icap_headers.insert(
            http::HeaderName::from_static("x-opaque"),
            http::HeaderValue::from_bytes(&[0xE4, 0xFF]).unwrap(),
        );
        assert!(matches!(
            MessageBuilder::new(&req, &authority()).build(),
            Err(BuildError::NonUtf8HeaderValue(name)) if name == "x-opaque"
        ));
    }

    #[test]
    fn allow_header_variants() {
        let req = Request::respmod("scan").allow_204(true).allow_206(true);
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        assert!(text.contains("Allow: 204, 206\r\n"));
    }

    #[test]
    fn canonical_header_names_on_wire() {
        let req = Request::respmod("scan").icap_header("x-scan-profile", "strict");
        let built = MessageBuilder::new(&req, &authority()).build().unwrap();
        let text = String::from_utf8(built.bytes).unwrap();
        assert!(text.contains("X-Scan-Profile: strict\r\n"));
    }
}
