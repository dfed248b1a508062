//! Wire-level parsing for the ICAP client.
//!
//! - [`icap`](self::icap): the incremental [`ResponseParser`] state machine.
//! - [`encap`]: `Encapsulated` offset parsing and validation.
//! - [`wire`]: chunked transfer encoding/decoding.
//! - [`http_embed`]: encapsulated HTTP head serialization/parsing.

pub mod encap;
pub mod http_embed;
mod icap;
pub mod wire;

pub use encap::Encapsulated;
pub use http_embed::{EmbeddedHead, HttpHead};
pub use icap::{ParseEvent, ResponseParser};
pub use wire::{ChunkDecoder, ChunkResult, encode_chunk, encode_terminal};

/// Find end of a header block (position after CRLFCRLF).
#[inline]
pub(crate) fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n").map(|i| i + 4)
}

/// Find the first CRLF.
#[inline]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n")
}
