//! Error taxonomy for the ICAP protocol engine.
//!
//! Errors are split by the layer that produces them:
//! - [`ProtocolError`]: malformed wire data coming from the server. Fatal to
//!   the current exchange; the connection must be `reset()` (or discarded)
//!   before reuse.
//! - [`BuildError`]: a structurally invalid caller-supplied request,
//!   rejected before any I/O happens.
//! - [`ConnError`]: connection-level failures such as transport errors,
//!   state machine misuse, and timeouts.
//!
//! The engine never logs, retries, or swallows an error on the caller's
//! behalf; everything is returned as a typed result.

use std::time::Duration;
use thiserror::Error;

use crate::request::Method;

/// Malformed wire data received from the ICAP server.
///
/// Where possible the variant carries the byte offset or the offending token
/// so the caller can tell a misbehaving server from a local bug.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The ICAP status line did not match `ICAP/1.0 <3-digit-code> <reason>`.
    #[error("malformed ICAP status line: {0}")]
    MalformedStatusLine(String),

    /// The status line named a protocol version other than `ICAP/1.0`.
    #[error("unsupported ICAP version: {0}")]
    UnsupportedVersion(String),

    /// A header line could not be parsed (missing colon, bad name bytes,
    /// or a continuation line with nothing to continue).
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The header block exceeded [`crate::MAX_HDR_BYTES`] without terminating.
    #[error("header block exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// The `Encapsulated` header violated the section-ordering rule or
    /// carried an unknown/duplicate tag or a non-numeric offset.
    #[error("invalid Encapsulated header: {0}")]
    InvalidEncapsulation(String),

    /// A chunk size line was not valid hexadecimal.
    #[error("malformed chunk size {found:?} at byte {offset}")]
    MalformedChunkSize { offset: usize, found: String },

    /// A chunk payload was not terminated by CRLF, or the terminal chunk's
    /// trailer block was malformed.
    #[error("malformed chunk at byte {offset}: {detail}")]
    MalformedChunk { offset: usize, detail: String },

    /// The stream ended with fewer payload bytes than the chunk declared.
    #[error("truncated chunk: declared {declared} bytes, {available} available")]
    TruncatedChunk { declared: usize, available: usize },

    /// The stream ended in the middle of the named parse phase.
    #[error("unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),
}

/// A caller-supplied [`Request`](crate::Request) that cannot legally be put
/// on the wire. Detected before any byte is written.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The embedded HTTP message is not legal for the ICAP method
    /// (e.g. an HTTP response on REQMOD, or any embedded message on OPTIONS).
    #[error("{section} is not a legal encapsulated section for {method}")]
    InvalidSectionCombination {
        method: Method,
        section: &'static str,
    },

    /// A header name/value or the service path contains a bare CR or LF,
    /// which would let a caller smuggle extra header lines.
    #[error("header or URI component {0:?} contains CR/LF")]
    HeaderInjection(String),

    /// An ICAP header holds bytes that are not valid UTF-8 and cannot be
    /// rendered on the wire.
    #[error("header {0} has a non-UTF-8 value")]
    NonUtf8HeaderValue(String),

    /// The server authority string is not a valid `icap://host[:port]` URI.
    #[error("invalid ICAP authority: {0}")]
    InvalidAuthority(String),
}

/// Connection-level failure from [`IcapConnection`](crate::IcapConnection).
#[derive(Error, Debug)]
pub enum ConnError {
    /// `send()`/`receive()`/`reset()` was called while the connection was in
    /// the named state instead of one the operation accepts.
    #[error("operation not valid in connection state {0}")]
    NotIdle(&'static str),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    Build(#[from] BuildError),

    /// Writing the request (or the post-preview remainder) failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Reading the response failed at the transport level.
    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    /// The server sent bytes the parser could not accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolError),

    /// No forward progress (successful read or write) within the deadline.
    #[error("no forward progress within {0:?}")]
    Timeout(Duration),

    /// The stream ended before the response reached its terminal state.
    #[error("connection closed before response completed")]
    ConnectionClosed {
        #[source]
        source: Option<ProtocolError>,
    },

    /// The server sent `100 Continue` although no preview remainder was
    /// outstanding.
    #[error("unexpected 100 Continue from server")]
    UnexpectedContinue,
}
