//! `Encapsulated` header offsets (RFC 3507 §4.4.1).
//!
//! Offsets are **relative to the start of the encapsulated area**, i.e.
//! immediately after the ICAP header block's CRLFCRLF, not to the whole
//! message.

use std::fmt::Write as _;

use crate::error::ProtocolError;
use crate::request::Method;

/// Parsed `Encapsulated` offsets.
///
/// Exactly one of `req_body`/`res_body`/`opt_body`/`null_body` is present in
/// a valid header; it marks the end of the header sections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Encapsulated {
    pub req_hdr: Option<usize>,
    pub res_hdr: Option<usize>,
    pub req_body: Option<usize>,
    pub res_body: Option<usize>,
    pub opt_body: Option<usize>,
    pub null_body: Option<usize>,
}

/// Canonical tag order on the wire. Header sections first, body tag last.
const TAG_ORDER: [&str; 6] = [
    "req-hdr", "res-hdr", "req-body", "res-body", "opt-body", "null-body",
];

impl Encapsulated {
    /// Parse the value of an `Encapsulated:` header (right of the colon).
    pub fn parse(val: &str) -> Result<Self, ProtocolError> {
        if val.trim().is_empty() {
            return Err(ProtocolError::InvalidEncapsulation("empty value".into()));
        }

        let mut enc = Encapsulated::default();
        let mut seen: Vec<(usize, usize)> = Vec::new(); // (tag rank, offset)

        for part in val.split(',') {
            let p = part.trim();
            let (name_raw, off_raw) = p.split_once('=').ok_or_else(|| {
                ProtocolError::InvalidEncapsulation(format!("token without '=': {p}"))
            })?;

            let name = name_raw.trim().to_ascii_lowercase();
            let off: usize = off_raw.trim().parse().map_err(|_| {
                ProtocolError::InvalidEncapsulation(format!("non-numeric offset: {off_raw}"))
            })?;

            let rank = TAG_ORDER
                .iter()
                .position(|t| *t == name)
                .ok_or_else(|| ProtocolError::InvalidEncapsulation(format!("unknown tag: {name}")))?;

            let slot = match name.as_str() {
                "req-hdr" => &mut enc.req_hdr,
                "res-hdr" => &mut enc.res_hdr,
                "req-body" => &mut enc.req_body,
                "res-body" => &mut enc.res_body,
                "opt-body" => &mut enc.opt_body,
                _ => &mut enc.null_body,
            };
            if slot.replace(off).is_some() {
                return Err(ProtocolError::InvalidEncapsulation(format!(
                    "duplicate tag: {name}"
                )));
            }
            seen.push((rank, off));
        }

        for w in seen.windows(2) {
            if w[1].0 <= w[0].0 {
                return Err(ProtocolError::InvalidEncapsulation(format!(
                    "tag {} out of order",
                    TAG_ORDER[w[1].0]
                )));
            }
            if w[1].1 < w[0].1 {
                return Err(ProtocolError::InvalidEncapsulation(format!(
                    "offsets not monotonic: {} -> {}",
                    w[0].1, w[1].1
                )));
            }
        }

        let bodies = [enc.req_body, enc.res_body, enc.opt_body, enc.null_body]
            .iter()
            .filter(|o| o.is_some())
            .count();
        if bodies != 1 {
            return Err(ProtocolError::InvalidEncapsulation(format!(
                "expected exactly one body tag, found {bodies}"
            )));
        }

        Ok(enc)
    }

    /// Validate the section combination in a *response* to a request that
    /// used `method`.
    ///
    /// REQMOD servers may answer with either an adapted request or a full
    /// HTTP response (RFC 3507 §6.2), so both families are legal there, but
    /// never mixed.
    pub fn validate_response(&self, method: Method) -> Result<(), ProtocolError> {
        let illegal = |tag: &str| {
            Err(ProtocolError::InvalidEncapsulation(format!(
                "{tag} not legal in a {method} response"
            )))
        };
        match method {
            Method::Options => {
                if self.req_hdr.is_some() || self.req_body.is_some() {
                    return illegal("req-hdr/req-body");
                }
                if self.res_hdr.is_some() || self.res_body.is_some() {
                    return illegal("res-hdr/res-body");
                }
            }
            Method::ReqMod => {
                if self.opt_body.is_some() {
                    return illegal("opt-body");
                }
                if self.req_hdr.is_some() && self.res_hdr.is_some() {
                    return illegal("both req-hdr and res-hdr");
                }
                if self.req_body.is_some() && (self.res_hdr.is_some()) {
                    return illegal("res-hdr with req-body");
                }
                if self.res_body.is_some() && (self.req_hdr.is_some()) {
                    return illegal("req-hdr with res-body");
                }
            }
            Method::RespMod => {
                if self.opt_body.is_some() {
                    return illegal("opt-body");
                }
                if self.req_hdr.is_some() || self.req_body.is_some() {
                    return illegal("req-hdr/req-body");
                }
            }
        }
        Ok(())
    }

    /// Offset of the encapsulated HTTP header block, if one is declared.
    pub fn head_offset(&self) -> Option<usize> {
        self.req_hdr.or(self.res_hdr)
    }

    /// True if the embedded head is an HTTP request head.
    pub fn head_is_request(&self) -> bool {
        self.req_hdr.is_some()
    }

    /// Offset of the chunked body, if a real body is declared.
    pub fn body_offset(&self) -> Option<usize> {
        self.req_body.or(self.res_body).or(self.opt_body)
    }

    /// Offset that terminates the header sections: the body offset, real or
    /// null.
    pub fn end_of_heads(&self) -> Option<usize> {
        self.body_offset().or(self.null_body)
    }

    /// Render the header value, e.g. `req-hdr=0, req-body=123`.
    pub fn header_value(&self) -> String {
        let mut out = String::new();
        let slots = [
            self.req_hdr,
            self.res_hdr,
            self.req_body,
            self.res_body,
            self.opt_body,
            self.null_body,
        ];
        for (tag, off) in TAG_ORDER.iter().zip(slots) {
            if let Some(off) = off {
                if !out.is_empty() {
                    out.push_str(", ");
                }
                write!(&mut out, "{tag}={off}").unwrap();
            }
        }
        out
    }
}
