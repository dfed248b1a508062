//! HTTP-style chunked transfer framing for encapsulated ICAP bodies.
//!
//! Encoding is a pair of free functions appending to an output buffer.
//! Decoding is a resumable [`ChunkDecoder`]: the caller owns an accumulating
//! input buffer, calls [`ChunkDecoder::decode_next`] as bytes arrive and
//! drains exactly the number of bytes the decoder reports consumed.
//! Consumption is all-or-nothing per logical unit (size line, then
//! payload + CRLF, then trailer block), so the decoder never has to stash
//! partial units internally.

use http::{HeaderMap, HeaderName, HeaderValue};
use memchr::memmem;

use crate::MAX_HDR_BYTES;
use crate::error::ProtocolError;

/// Upper bound for a chunk size line including extensions.
const MAX_SIZE_LINE: usize = 1024;

/// Append one chunk: `<HEX>\r\n<data>\r\n`.
///
/// Empty `data` produces the bare terminal size line `0\r\n`; the caller
/// appends trailers and the final CRLF separately (or uses
/// [`encode_terminal`]).
pub fn encode_chunk(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    if !data.is_empty() {
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
    }
}

/// Append the terminal chunk `0\r\n\r\n`, or `0; ieof\r\n\r\n` when the
/// preview covered the entire body (RFC 3507 §4.5).
pub fn encode_terminal(out: &mut Vec<u8>, ieof: bool) {
    if ieof {
        out.extend_from_slice(b"0; ieof\r\n\r\n");
    } else {
        out.extend_from_slice(b"0\r\n\r\n");
    }
}

/// One step of chunked decoding.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkResult {
    /// The buffer does not yet hold a complete logical unit.
    NeedMoreData,
    /// One decoded chunk payload.
    Chunk(Vec<u8>),
    /// The terminal chunk, with any trailer headers that followed it.
    Terminal {
        trailers: HeaderMap,
        /// `ieof` extension seen on the zero chunk.
        ieof: bool,
    },
}

#[derive(Debug)]
enum DecodeState {
    SizeLine,
    Trailers { ieof: bool },
    Done,
}

/// Resumable decoder for one chunked body.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: DecodeState,
    /// Total bytes consumed so far, for error offsets.
    scanned: usize,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::SizeLine,
            scanned: 0,
        }
    }

    /// True once the terminal chunk (and its trailers) have been decoded.
    pub fn is_done(&self) -> bool {
        matches!(self.state, DecodeState::Done)
    }

    /// Decode the next logical unit from `input`, returning the event and
    /// the number of bytes consumed. Set `eof` when the stream has ended so
    /// an incomplete unit is reported as truncation instead of
    /// `NeedMoreData`.
    pub fn decode_next(
        &mut self,
        input: &[u8],
        eof: bool,
    ) -> Result<(ChunkResult, usize), ProtocolError> {
        let mut consumed = 0usize;
        loop {
            let buf = &input[consumed..];
            match self.state {
                DecodeState::Done => return Ok((ChunkResult::NeedMoreData, consumed)),
                DecodeState::SizeLine => {
                    let Some(i) = memmem::find(buf, b"\r\n") else {
                        if buf.len() > MAX_SIZE_LINE {
                            return Err(ProtocolError::MalformedChunkSize {
                                offset: self.scanned,
                                found: String::from_utf8_lossy(&buf[..32]).into_owned(),
                            });
                        }
                        if eof {
                            return Err(ProtocolError::UnexpectedEof("chunk size line"));
                        }
                        return Ok((ChunkResult::NeedMoreData, consumed));
                    };

                    let size_line = &buf[..i];
                    let (size_hex, ext) = match size_line.iter().position(|&b| b == b';') {
                        Some(p) => (&size_line[..p], &size_line[p + 1..]),
                        None => (size_line, &[][..]),
                    };
                    let size_str = std::str::from_utf8(size_hex)
                        .map_err(|_| ProtocolError::MalformedChunkSize {
                            offset: self.scanned,
                            found: String::from_utf8_lossy(size_hex).into_owned(),
                        })?
                        .trim();
                    let size = usize::from_str_radix(size_str, 16).map_err(|_| {
                        ProtocolError::MalformedChunkSize {
                            offset: self.scanned,
                            found: size_str.to_string(),
                        }
                    })?;
                    let ieof = std::str::from_utf8(ext)
                        .map(|s| s.split(';').any(|tok| tok.trim().eq_ignore_ascii_case("ieof")))
                        .unwrap_or(false);

                    if size == 0 {
                        consumed += i + 2;
                        self.scanned += i + 2;
                        self.state = DecodeState::Trailers { ieof };
                        continue;
                    }

                    let need = i + 2 + size + 2;
                    if buf.len() < need {
                        if eof {
                            return Err(ProtocolError::TruncatedChunk {
                                declared: size,
                                available: buf.len().saturating_sub(i + 2).min(size),
                            });
                        }
                        return Ok((ChunkResult::NeedMoreData, consumed));
                    }
                    if &buf[i + 2 + size..need] != b"\r\n" {
                        return Err(ProtocolError::MalformedChunk {
                            offset: self.scanned + i + 2 + size,
                            detail: "chunk payload not terminated by CRLF".into(),
                        });
                    }
                    let payload = buf[i + 2..i + 2 + size].to_vec();
                    consumed += need;
                    self.scanned += need;
                    return Ok((ChunkResult::Chunk(payload), consumed));
                }
                DecodeState::Trailers { ieof } => {
                    // No trailers: the zero size line is followed directly by
                    // the final CRLF.
                    if buf.len() >= 2 && &buf[..2] == b"\r\n" {
                        consumed += 2;
                        self.scanned += 2;
                        self.state = DecodeState::Done;
                        return Ok((
                            ChunkResult::Terminal {
                                trailers: HeaderMap::new(),
                                ieof,
                            },
                            consumed,
                        ));
                    }
                    let Some(j) = memmem::find(buf, b"\r\n\r\n") else {
                        if buf.len() > MAX_HDR_BYTES {
                            return Err(ProtocolError::HeaderTooLarge(MAX_HDR_BYTES));
                        }
                        if eof {
                            return Err(ProtocolError::UnexpectedEof("chunk trailers"));
                        }
                        return Ok((ChunkResult::NeedMoreData, consumed));
                    };

                    let trailers = parse_trailer_block(&buf[..j + 2], self.scanned)?;
                    consumed += j + 4;
                    self.scanned += j + 4;
                    self.state = DecodeState::Done;
                    return Ok((ChunkResult::Terminal { trailers, ieof }, consumed));
                }
            }
        }
    }
}

/// Parse the trailer header lines after the zero chunk. Unknown trailer
/// fields are kept opaquely.
fn parse_trailer_block(block: &[u8], base_offset: usize) -> Result<HeaderMap, ProtocolError> {
    let text = std::str::from_utf8(block).map_err(|_| ProtocolError::MalformedChunk {
        offset: base_offset,
        detail: "trailer block is not valid UTF-8".into(),
    })?;
    let mut trailers = HeaderMap::new();
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::MalformedChunk {
                offset: base_offset,
                detail: format!("trailer line without colon: {line}"),
            });
        };
        let n = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| {
            ProtocolError::MalformedChunk {
                offset: base_offset,
                detail: format!("invalid trailer name: {name}"),
            }
        })?;
        let v = HeaderValue::from_str(value.trim()).map_err(|_| ProtocolError::MalformedChunk {
            offset: base_offset,
            detail: format!("invalid trailer value for {name}"),
        })?;
        trailers.append(n, v);
    }
    Ok(trailers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(raw: &[u8]) -> (Vec<Vec<u8>>, HeaderMap, bool) {
        let mut dec = ChunkDecoder::new();
        let mut buf = raw.to_vec();
        let mut chunks = Vec::new();
        loop {
            let (ev, n) = dec.decode_next(&buf, false).expect("decode");
            buf.drain(..n);
            match ev {
                ChunkResult::Chunk(c) => chunks.push(c),
                ChunkResult::Terminal { trailers, ieof } => return (chunks, trailers, ieof),
                ChunkResult::NeedMoreData => panic!("incomplete fixture"),
            }
        }
    }

    #[test]
    fn encode_forms() {
        let mut out = Vec::new();
        encode_chunk(&mut out, b"hello");
        assert_eq!(out, b"5\r\nhello\r\n");

        out.clear();
        encode_chunk(&mut out, &[0u8; 26]);
        assert!(out.starts_with(b"1A\r\n"));

        out.clear();
        encode_chunk(&mut out, b"");
        assert_eq!(out, b"0\r\n");

        out.clear();
        encode_terminal(&mut out, false);
        assert_eq!(out, b"0\r\n\r\n");

        out.clear();
        encode_terminal(&mut out, true);
        assert_eq!(out, b"0; ieof\r\n\r\n");
    }

    #[test]
    fn decode_two_chunks_and_terminal() {
        let (chunks, trailers, ieof) = decode_all(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        assert_eq!(chunks, vec![b"hello".to_vec(), b" world".to_vec()]);
        assert!(trailers.is_empty());
        assert!(!ieof);
    }

    #[test]
    fn size_is_case_insensitive_and_extensions_skipped() {
        let (chunks, _, _) = decode_all(b"a;name=value\r\n0123456789\r\n0\r\n\r\n");
        assert_eq!(chunks, vec![b"0123456789".to_vec()]);
        let (chunks, _, _) = decode_all(b"A\r\n0123456789\r\n0\r\n\r\n");
        assert_eq!(chunks, vec![b"0123456789".to_vec()]);
    }

    #[test]
    fn ieof_extension_detected() {
        let (chunks, _, ieof) = decode_all(b"4\r\nabcd\r\n0; ieof\r\n\r\n");
        assert_eq!(chunks, vec![b"abcd".to_vec()]);
        assert!(ieof);
    }

    #[test]
    fn trailers_after_terminal_chunk() {
        let (chunks, trailers, _) =
            decode_all(b"3\r\nabc\r\n0\r\nX-Scan-Result: clean\r\nX-Virus-ID: none\r\n\r\n");
        assert_eq!(chunks, vec![b"abc".to_vec()]);
        assert_eq!(trailers.get("x-scan-result").unwrap(), "clean");
        assert_eq!(trailers.get("x-virus-id").unwrap(), "none");
    }

    #[test]
    fn resumable_across_arbitrary_splits() {
        let raw = b"5\r\nhello\r\n6\r\n world\r\n0\r\nX-T: v\r\n\r\n";
        for split in 1..raw.len() {
            let mut dec = ChunkDecoder::new();
            let mut buf = Vec::new();
            let mut got = Vec::new();
            let mut done = false;
            for piece in [&raw[..split], &raw[split..]] {
                buf.extend_from_slice(piece);
                loop {
                    let (ev, n) = dec.decode_next(&buf, false).expect("decode");
                    buf.drain(..n);
                    match ev {
                        ChunkResult::NeedMoreData => break,
                        ChunkResult::Chunk(c) => got.extend_from_slice(&c),
                        ChunkResult::Terminal { trailers, .. } => {
                            assert_eq!(trailers.get("x-t").unwrap(), "v");
                            done = true;
                            break;
                        }
                    }
                }
            }
            assert!(done, "split at {split} never reached terminal");
            assert_eq!(got, b"hello world");
        }
    }

    #[test]
    fn consumes_nothing_on_partial_unit() {
        let mut dec = ChunkDecoder::new();
        // Size line promises 50 bytes, only part of payload present.
        let (ev, n) = dec.decode_next(b"32\r\nonly-twenty-bytes!!!", false).unwrap();
        assert_eq!(ev, ChunkResult::NeedMoreData);
        assert_eq!(n, 0);
    }

    #[test]
    fn malformed_size_rejected() {
        let mut dec = ChunkDecoder::new();
        let err = dec.decode_next(b"ZZ\r\n", false).unwrap_err();
        assert!(
            matches!(err, ProtocolError::MalformedChunkSize { ref found, .. } if found == "ZZ"),
            "got {err:?}"
        );
    }

    #[test]
    fn truncated_chunk_reported_at_eof() {
        let mut dec = ChunkDecoder::new();
        let mut data = b"32\r\n".to_vec(); // declares 50 bytes
        data.extend_from_slice(&[b'x'; 20]);
        let err = dec.decode_next(&data, true).unwrap_err();
        assert!(
            matches!(
                err,
                ProtocolError::TruncatedChunk {
                    declared: 50,
                    available: 20
                }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn eof_mid_size_line() {
        let mut dec = ChunkDecoder::new();
        let err = dec.decode_next(b"1A", true).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof(_)));
    }
}
