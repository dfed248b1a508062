//! Build a request, then pick it apart byte-exactly: the `Encapsulated`
//! offsets must match the real positions of each section, and the chunked
//! body must decode back to the original payload.

use http::{Request as HttpRequest, Response as HttpResponse};
use icap_client::parser::{ChunkDecoder, ChunkResult};
use icap_client::{Authority, Encapsulated, MessageBuilder, Request};

fn authority() -> Authority {
    Authority::new("av.example", 1344)
}

/// Split built bytes into (icap header text, encapsulated region).
fn split_message(bytes: &[u8]) -> (String, Vec<u8>) {
    let end = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("ICAP header terminator")
        + 4;
    (
        String::from_utf8(bytes[..end].to_vec()).unwrap(),
        bytes[end..].to_vec(),
    )
}

fn encapsulated_of(head: &str) -> Encapsulated {
    let line = head
        .lines()
        .find(|l| l.starts_with("Encapsulated:"))
        .expect("Encapsulated header");
    Encapsulated::parse(line.strip_prefix("Encapsulated:").unwrap()).unwrap()
}

fn decode_body(raw: &[u8]) -> Vec<u8> {
    let mut dec = ChunkDecoder::new();
    let mut buf = raw.to_vec();
    let mut out = Vec::new();
    loop {
        let (ev, n) = dec.decode_next(&buf, true).expect("well-formed body");
        buf.drain(..n);
        match ev {
            ChunkResult::Chunk(c) => out.extend_from_slice(&c),
            ChunkResult::Terminal { .. } => return out,
            ChunkResult::NeedMoreData => panic!("body incomplete"),
        }
    }
}

#[test]
fn reqmod_offsets_are_byte_exact() {
    let payload = b"some bytes that should come back out intact".to_vec();
    let http_req = HttpRequest::builder()
        .method("POST")
        .uri("http://origin.example/upload")
        .header("Host", "origin.example")
        .header("Content-Type", "application/octet-stream")
        .body(payload.clone())
        .unwrap();
    let req = Request::reqmod("scan").with_http_request(http_req);
    let built = MessageBuilder::new(&req, &authority()).build().unwrap();

    let (head_text, region) = split_message(&built.bytes);
    let enc = encapsulated_of(&head_text);

    assert_eq!(enc.req_hdr, Some(0));
    let body_off = enc.req_body.expect("req-body declared");

    // The declared offset lands exactly on the end of the HTTP head.
    assert!(region[..body_off].ends_with(b"\r\n\r\n"));
    assert!(region[..body_off].starts_with(b"POST http://origin.example/upload HTTP/1.1\r\n"));

    // Chunked section decodes back to the original payload.
    assert_eq!(decode_body(&region[body_off..]), payload);
}

#[test]
fn respmod_offsets_are_byte_exact() {
    let payload = vec![0x5au8; 1000];
    let http_resp = HttpResponse::builder()
        .status(200)
        .header("Content-Type", "application/octet-stream")
        .header("Content-Length", "1000")
        .body(payload.clone())
        .unwrap();
    let req = Request::respmod("avscan")
        .allow_204(true)
        .with_http_response(http_resp);
    let built = MessageBuilder::new(&req, &authority()).build().unwrap();

    let (head_text, region) = split_message(&built.bytes);
    assert!(head_text.starts_with("RESPMOD icap://av.example:1344/avscan ICAP/1.0\r\n"));
    assert!(head_text.contains("Allow: 204\r\n"));

    let enc = encapsulated_of(&head_text);
    assert_eq!(enc.res_hdr, Some(0));
    let body_off = enc.res_body.expect("res-body declared");
    assert!(region[..body_off].starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(region[..body_off].ends_with(b"\r\n\r\n"));
    assert_eq!(decode_body(&region[body_off..]), payload);
}

#[test]
fn preview_bytes_plus_remainder_reassemble_the_body() {
    let payload = b"0123456789abcdef".to_vec();
    let http_req = HttpRequest::builder()
        .method("POST")
        .uri("http://origin.example/u")
        .body(payload.clone())
        .unwrap();
    let req = Request::reqmod("scan").preview(6).with_http_request(http_req);
    let built = MessageBuilder::new(&req, &authority()).build().unwrap();

    let (head_text, region) = split_message(&built.bytes);
    assert!(head_text.contains("Preview: 6\r\n"));
    let enc = encapsulated_of(&head_text);
    let body_off = enc.req_body.unwrap();

    let preview = decode_body(&region[body_off..]);
    let remainder = built.remaining_body.expect("preview withheld bytes");
    assert_eq!(preview, &payload[..6]);
    assert_eq!(remainder, &payload[6..]);
    assert!(built.expect_continue);
}

#[test]
fn chunk_roundtrip_across_arbitrary_encodings() {
    // Encode one payload as several different chunk splits; every encoding
    // must decode to the same bytes.
    let payload: Vec<u8> = (0u16..300).map(|b| (b % 251) as u8).collect();
    for split in [1usize, 7, 64, 299] {
        let mut encoded = Vec::new();
        for piece in payload.chunks(split) {
            icap_client::parser::encode_chunk(&mut encoded, piece);
        }
        icap_client::parser::encode_terminal(&mut encoded, false);
        assert_eq!(decode_body(&encoded), payload, "split {split}");
    }
}
