//! Incremental ICAP response parser.
//!
//! One [`ResponseParser`] instance handles one exchange. The caller appends
//! raw bytes via [`ResponseParser::feed`] in arbitrary fragments (a single
//! call may supply anywhere from one byte to the whole response) and gets
//! back the [`ParseEvent`]s the new bytes unlocked. Body bytes are surfaced
//! chunk by chunk; the parser never buffers an unbounded body, leaving the
//! accumulate-versus-stream decision to the caller.

use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, trace};

use crate::MAX_HDR_BYTES;
use crate::error::ProtocolError;
use crate::parser::encap::Encapsulated;
use crate::parser::http_embed::{EmbeddedHead, parse_http_head};
use crate::parser::wire::{ChunkDecoder, ChunkResult};
use crate::parser::{find_crlf, find_double_crlf};
use crate::request::Method;
use crate::response::{Response, StatusCode};

/// Progress notification from [`ResponseParser::feed`].
///
/// An empty event list from `feed` means the buffered bytes do not yet
/// complete the next logical unit (need more data).
#[derive(Debug, PartialEq, Eq)]
pub enum ParseEvent {
    /// Status line parsed.
    StatusReady { code: StatusCode, reason: String },
    /// ICAP header block (and `Encapsulated` validation) complete.
    HeadersReady,
    /// One decoded body chunk.
    BodyChunk(Vec<u8>),
    /// Terminal state reached. For a `100 Continue` this ends the *message*,
    /// not the exchange: the caller is expected to send the rest of the
    /// preview body and parse the final response with a fresh parser.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    StatusLine,
    Headers,
    /// Waiting for the declared encapsulated HTTP head; `need` is its exact
    /// length from the `Encapsulated` offsets.
    EncapHead { need: usize },
    Body,
    Done,
}

impl ParseState {
    fn name(self) -> &'static str {
        match self {
            ParseState::StatusLine => "status line",
            ParseState::Headers => "headers",
            ParseState::EncapHead { .. } => "encapsulated HTTP headers",
            ParseState::Body => "chunked body",
            ParseState::Done => "done",
        }
    }
}

/// Push parser for one ICAP response.
#[derive(Debug)]
pub struct ResponseParser {
    /// Method of the request this response answers; selects the legal
    /// `Encapsulated` section combinations.
    method: Method,
    state: ParseState,
    buf: Vec<u8>,
    status: Option<(StatusCode, String)>,
    icap_headers: HeaderMap,
    encapsulated: Option<Encapsulated>,
    embedded: Option<EmbeddedHead>,
    trailers: HeaderMap,
    chunks: ChunkDecoder,
}

impl ResponseParser {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            state: ParseState::StatusLine,
            buf: Vec::new(),
            status: None,
            icap_headers: HeaderMap::new(),
            encapsulated: None,
            embedded: None,
            trailers: HeaderMap::new(),
            chunks: ChunkDecoder::new(),
        }
    }

    /// Status code, once the status line has been parsed.
    pub fn status(&self) -> Option<StatusCode> {
        self.status.as_ref().map(|(c, _)| *c)
    }

    /// True once the terminal state is reached.
    pub fn is_done(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Append `input` and advance as far as the buffered bytes allow.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<ParseEvent>, ProtocolError> {
        trace!(len = input.len(), state = self.state.name(), "feed");
        self.buf.extend_from_slice(input);
        let mut events = Vec::new();

        loop {
            match self.state {
                ParseState::StatusLine => {
                    let Some(i) = find_crlf(&self.buf) else {
                        self.check_head_bound()?;
                        break;
                    };
                    let (code, reason) = parse_status_line(&self.buf[..i])?;
                    debug!(%code, reason, "status line");
                    self.buf.drain(..i + 2);
                    self.status = Some((code, reason.clone()));
                    self.state = ParseState::Headers;
                    events.push(ParseEvent::StatusReady { code, reason });
                }
                ParseState::Headers => {
                    let block_end = if self.buf.starts_with(b"\r\n") {
                        // Empty header block.
                        Some(0)
                    } else {
                        find_double_crlf(&self.buf).map(|end| end - 4)
                    };
                    let Some(end) = block_end else {
                        self.check_head_bound()?;
                        break;
                    };
                    let lines = unfold_header_lines(&self.buf[..end])?;
                    for (name, value) in &lines {
                        let n = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                            ProtocolError::MalformedHeader(format!("invalid header name: {name}"))
                        })?;
                        let v = HeaderValue::from_str(value).map_err(|_| {
                            ProtocolError::MalformedHeader(format!(
                                "invalid header value for {name}"
                            ))
                        })?;
                        self.icap_headers.append(n, v);
                    }
                    self.buf.drain(..if end == 0 { 2 } else { end + 4 });
                    debug!(headers = lines.len(), "ICAP header block complete");

                    self.after_icap_headers(&mut events)?;
                }
                ParseState::EncapHead { need } => {
                    if self.buf.len() < need {
                        break;
                    }
                    let enc = self
                        .encapsulated
                        .as_ref()
                        .expect("EncapHead state implies Encapsulated parsed");
                    let head = parse_http_head(&self.buf[..need], enc.head_is_request())?;
                    trace!(len = need, "encapsulated HTTP head parsed");
                    self.embedded = Some(head);
                    self.buf.drain(..need);
                    if enc.body_offset().is_some() {
                        self.state = ParseState::Body;
                    } else {
                        self.state = ParseState::Done;
                        events.push(ParseEvent::Done);
                    }
                }
                ParseState::Body => {
                    let (result, consumed) = self.chunks.decode_next(&self.buf, false)?;
                    self.buf.drain(..consumed);
                    match result {
                        ChunkResult::NeedMoreData => break,
                        ChunkResult::Chunk(payload) => {
                            trace!(len = payload.len(), "body chunk");
                            events.push(ParseEvent::BodyChunk(payload));
                        }
                        ChunkResult::Terminal { trailers, ieof: _ } => {
                            debug!(trailers = trailers.len(), "body complete");
                            self.trailers = trailers;
                            self.state = ParseState::Done;
                            events.push(ParseEvent::Done);
                        }
                    }
                }
                ParseState::Done => break,
            }
        }

        Ok(events)
    }

    /// Signal end-of-stream. Errors unless the response already reached its
    /// terminal state; mid-chunk truncation is reported precisely.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            ParseState::Done => Ok(()),
            ParseState::Body => {
                // Let the chunk decoder turn what it was waiting for into a
                // precise truncation error.
                match self.chunks.decode_next(&self.buf, true) {
                    Err(e) => Err(e),
                    Ok(_) => Err(ProtocolError::UnexpectedEof("chunked body")),
                }
            }
            other => Err(ProtocolError::UnexpectedEof(other.name())),
        }
    }

    /// Consume the parser, yielding any buffered bytes past the terminal
    /// state. After a `100 Continue` these belong to the final response.
    pub fn into_remaining(self) -> Vec<u8> {
        self.buf
    }

    /// Consume the parser, yielding the assembled [`Response`] with an empty
    /// body; the caller supplies whatever body materialization it chose from
    /// the [`ParseEvent::BodyChunk`] events.
    pub fn into_response(self) -> Result<Response, ProtocolError> {
        if self.state != ParseState::Done {
            return Err(ProtocolError::UnexpectedEof(self.state.name()));
        }
        let (status_code, reason) = self.status.expect("Done implies status parsed");
        Ok(Response {
            status_code,
            reason,
            icap_headers: self.icap_headers,
            embedded: self.embedded,
            body: Vec::new(),
            trailers: self.trailers,
        })
    }

    /// Decide what follows the ICAP header block.
    fn after_icap_headers(&mut self, events: &mut Vec<ParseEvent>) -> Result<(), ProtocolError> {
        events.push(ParseEvent::HeadersReady);
        let code = self.status().expect("headers follow status line");

        // 100 Continue carries nothing; 204 has no encapsulated body
        // regardless of what the Encapsulated header claims.
        if matches!(code, StatusCode::Continue100 | StatusCode::NoContent204) {
            self.state = ParseState::Done;
            events.push(ParseEvent::Done);
            return Ok(());
        }

        let Some(value) = self.icap_headers.get("encapsulated") else {
            // Lenient towards servers omitting the header on bodyless
            // responses, as deployed implementations do.
            self.state = ParseState::Done;
            events.push(ParseEvent::Done);
            return Ok(());
        };
        let value = value
            .to_str()
            .map_err(|_| ProtocolError::InvalidEncapsulation("non-ASCII value".into()))?;
        let enc = Encapsulated::parse(value)?;
        enc.validate_response(self.method)?;

        match enc.head_offset() {
            Some(0) => {
                let need = enc.end_of_heads().expect("validated: one body tag");
                if need > MAX_HDR_BYTES {
                    return Err(ProtocolError::HeaderTooLarge(MAX_HDR_BYTES));
                }
                self.state = ParseState::EncapHead { need };
            }
            Some(off) => {
                return Err(ProtocolError::InvalidEncapsulation(format!(
                    "first section must start at offset 0, not {off}"
                )));
            }
            None => match (enc.body_offset(), enc.null_body) {
                (Some(0), _) => self.state = ParseState::Body,
                (Some(off), _) => {
                    return Err(ProtocolError::InvalidEncapsulation(format!(
                        "body without header section must start at 0, not {off}"
                    )));
                }
                (None, _) => {
                    self.state = ParseState::Done;
                    events.push(ParseEvent::Done);
                }
            },
        }
        self.encapsulated = Some(enc);
        Ok(())
    }

    fn check_head_bound(&self) -> Result<(), ProtocolError> {
        if self.buf.len() > MAX_HDR_BYTES {
            return Err(ProtocolError::HeaderTooLarge(MAX_HDR_BYTES));
        }
        Ok(())
    }
}

/// Parse `ICAP/1.0 <3-digit-code> <reason>`.
fn parse_status_line(line: &[u8]) -> Result<(StatusCode, String), ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| {
        ProtocolError::MalformedStatusLine(String::from_utf8_lossy(line).into_owned())
    })?;
    let mut parts = text.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| ProtocolError::MalformedStatusLine(text.to_string()))?;
    if version != crate::ICAP_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version.to_string()));
    }
    let code_tok = parts
        .next()
        .ok_or_else(|| ProtocolError::MalformedStatusLine(text.to_string()))?;
    if code_tok.len() != 3 || !code_tok.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedStatusLine(format!(
            "status code not 3 digits: {code_tok}"
        )));
    }
    let code = code_tok
        .parse::<u16>()
        .ok()
        .and_then(StatusCode::from_u16)
        .ok_or_else(|| {
            ProtocolError::MalformedStatusLine(format!("status code out of range: {code_tok}"))
        })?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Ok((code, reason))
}

/// Split a header block into (name, value) pairs, folding continuation
/// lines (leading whitespace) into the previous header's value.
fn unfold_header_lines(block: &[u8]) -> Result<Vec<(String, String)>, ProtocolError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ProtocolError::MalformedHeader("header block is not valid UTF-8".into()))?;
    let mut out: Vec<(String, String)> = Vec::new();
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some(last) = out.last_mut() else {
                return Err(ProtocolError::MalformedHeader(
                    "continuation line before any header".into(),
                ));
            };
            last.1.push(' ');
            last.1.push_str(line.trim());
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::MalformedHeader(format!(
                "header line without colon: {line}"
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ProtocolError::MalformedHeader("empty header name".into()));
        }
        out.push((name.to_string(), value.trim().to_string()));
    }
    Ok(out)
}
