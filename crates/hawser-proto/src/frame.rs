//! # Data-chunk framing
//!
//! Each chunk travels as `HDR <crc> <len>\n` followed by exactly `len`
//! payload bytes, where `crc` is the decimal unsigned CRC-32/IEEE of the
//! payload. Frames are concatenated with no padding.
//!
//! The transport preserves bytes but not datagram boundaries, so the decoder
//! reassembles frames across arbitrary split points. A buffer that does not
//! start with `HDR ` but contains it later has its leading garbage discarded
//! (recovery from a misaligned start); a header line that fails to parse is a
//! terminal [`FrameError::BadHeader`]; a chunk whose CRC disagrees surfaces
//! as a [`FrameEvent::CrcMismatch`] and framing continues with the next
//! header.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

/// Chunk size used by the application-layer file chunker. Independent of the
/// transport MSS.
pub const CHUNK_SIZE: usize = 16 * 1024;

const HDR_PREFIX: &[u8] = b"HDR ";

/// CRC-32/IEEE of one chunk payload, as transmitted in the `HDR` line.
pub fn chunk_crc(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode one payload as a wire frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 24);
    let header = format!("HDR {} {}\n", chunk_crc(payload), payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

// ─── Errors & events ────────────────────────────────────────────────────────

/// Terminal framing failure: the session carrying this stream is over.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame header: {0}")]
    BadHeader(String),
}

/// One decoded frame, or a recoverable per-chunk failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A chunk whose CRC verified.
    Chunk(Bytes),
    /// Declared and computed CRC disagree; the chunk was discarded.
    CrcMismatch {
        declared: u32,
        computed: u32,
        len: usize,
    },
}

// ─── Decoder ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum State {
    ExpectingHeader,
    ExpectingPayload { len: usize, crc: u32 },
}

/// Incremental frame decoder over a reassembled byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    partial: BytesMut,
    state: State,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            partial: BytesMut::new(),
            state: State::ExpectingHeader,
        }
    }

    /// Append stream bytes as they arrive.
    pub fn push(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
    }

    /// Decode the next event, or `Ok(None)` if more bytes are needed.
    pub fn next_event(&mut self) -> Result<Option<FrameEvent>, FrameError> {
        loop {
            match self.state {
                State::ExpectingHeader => {
                    if !self.align_to_header() {
                        return Ok(None);
                    }
                    let Some(nl) = self.partial.iter().position(|&b| b == b'\n') else {
                        return Ok(None);
                    };
                    let line = self.partial.split_to(nl + 1);
                    let (crc, len) = parse_header_line(&line[..nl])?;
                    self.state = State::ExpectingPayload { len, crc };
                }
                State::ExpectingPayload { len, crc } => {
                    if self.partial.len() < len {
                        return Ok(None);
                    }
                    let payload = self.partial.split_to(len).freeze();
                    self.state = State::ExpectingHeader;
                    let computed = chunk_crc(&payload);
                    if computed != crc {
                        return Ok(Some(FrameEvent::CrcMismatch {
                            declared: crc,
                            computed,
                            len,
                        }));
                    }
                    return Ok(Some(FrameEvent::Chunk(payload)));
                }
            }
        }
    }

    /// Drop buffered bytes and return to the header state. Used after a
    /// terminal framing error ends the session.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.state = State::ExpectingHeader;
    }

    /// Bytes held while waiting for a complete header or payload.
    pub fn buffered(&self) -> usize {
        self.partial.len()
    }

    /// Position the buffer at the next `HDR ` prefix, discarding leading
    /// garbage. Returns false while no (possibly partial) prefix is visible.
    fn align_to_header(&mut self) -> bool {
        if self.partial.starts_with(HDR_PREFIX) {
            return true;
        }
        if let Some(pos) = find(&self.partial, HDR_PREFIX) {
            trace!(skipped = pos, "discarding bytes before frame header");
            self.partial.advance(pos);
            return true;
        }
        // Nothing that looks like a header start; keep only a tail that
        // could still grow into the prefix.
        let keep = partial_prefix_len(&self.partial);
        let drop = self.partial.len() - keep;
        if drop > 0 {
            trace!(skipped = drop, "discarding unframed bytes");
            self.partial.advance(drop);
        }
        false
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest buffer suffix that is a proper prefix of `HDR `.
fn partial_prefix_len(buf: &[u8]) -> usize {
    let max = (HDR_PREFIX.len() - 1).min(buf.len());
    for take in (1..=max).rev() {
        if buf.ends_with(&HDR_PREFIX[..take]) {
            return take;
        }
    }
    0
}

fn parse_header_line(line: &[u8]) -> Result<(u32, usize), FrameError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| FrameError::BadHeader("non-ascii header".to_owned()))?;
    let rest = text
        .strip_prefix("HDR ")
        .ok_or_else(|| FrameError::BadHeader(text.to_owned()))?;
    let mut fields = rest.split_whitespace();
    let crc = fields.next().and_then(|t| t.parse::<u32>().ok());
    let len = fields.next().and_then(|t| t.parse::<usize>().ok());
    match (crc, len, fields.next()) {
        (Some(crc), Some(len), None) => Ok((crc, len)),
        _ => Err(FrameError::BadHeader(text.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(dec: &mut FrameDecoder) -> Vec<FrameEvent> {
        let mut out = Vec::new();
        while let Some(ev) = dec.next_event().unwrap() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn single_frame_roundtrip() {
        let payload = b"the quick brown fox";
        let mut dec = FrameDecoder::new();
        dec.push(&encode_frame(payload));

        let events = decode_all(&mut dec);
        assert_eq!(events, vec![FrameEvent::Chunk(Bytes::from_static(payload))]);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn concatenated_frames_decode_in_order() {
        let mut wire = Vec::new();
        for i in 0..5u8 {
            wire.extend_from_slice(&encode_frame(&vec![i; 100 + i as usize]));
        }
        let mut dec = FrameDecoder::new();
        dec.push(&wire);

        let events = decode_all(&mut dec);
        assert_eq!(events.len(), 5);
        for (i, ev) in events.iter().enumerate() {
            match ev {
                FrameEvent::Chunk(p) => assert_eq!(p.len(), 100 + i),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn reassembles_across_byte_at_a_time_delivery() {
        let payload: Vec<u8> = (0..=255).collect();
        let wire = encode_frame(&payload);

        let mut dec = FrameDecoder::new();
        let mut chunks = Vec::new();
        for &b in wire.iter() {
            dec.push(&[b]);
            while let Some(ev) = dec.next_event().unwrap() {
                chunks.push(ev);
            }
        }
        assert_eq!(chunks, vec![FrameEvent::Chunk(Bytes::from(payload))]);
    }

    #[test]
    fn split_mid_header_line() {
        let wire = encode_frame(b"hello");
        let mut dec = FrameDecoder::new();
        dec.push(&wire[..6]); // "HDR <d..."
        assert_eq!(dec.next_event().unwrap(), None);
        dec.push(&wire[6..]);
        assert_eq!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(Bytes::from_static(b"hello")))
        );
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let mut wire = b"\x00\x01 noise ".to_vec();
        wire.extend_from_slice(&encode_frame(b"payload"));

        let mut dec = FrameDecoder::new();
        dec.push(&wire);
        assert_eq!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(Bytes::from_static(b"payload")))
        );
    }

    #[test]
    fn pure_garbage_is_bounded_not_fatal() {
        let mut dec = FrameDecoder::new();
        dec.push(&[0xFFu8; 4096]);
        assert_eq!(dec.next_event().unwrap(), None);
        assert!(dec.buffered() < HDR_PREFIX.len());

        dec.push(&encode_frame(b"after the noise"));
        assert_eq!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(Bytes::from_static(b"after the noise")))
        );
    }

    #[test]
    fn crc_mismatch_is_reported_and_framing_continues() {
        let good = encode_frame(b"good chunk");
        let wrong_crc = chunk_crc(b"bad chunk").wrapping_add(1);
        let mut bad = format!("HDR {wrong_crc} 9\n").into_bytes();
        bad.extend_from_slice(b"bad chunk");

        let mut dec = FrameDecoder::new();
        dec.push(&bad);
        dec.push(&good);

        match dec.next_event().unwrap() {
            Some(FrameEvent::CrcMismatch { declared, computed, len }) => {
                assert_eq!(len, 9);
                assert_eq!(declared, computed.wrapping_add(1));
            }
            other => panic!("expected CrcMismatch, got {other:?}"),
        }
        assert_eq!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(Bytes::from_static(b"good chunk")))
        );
    }

    #[test]
    fn malformed_header_is_terminal() {
        let mut dec = FrameDecoder::new();
        dec.push(b"HDR notanumber 12\n123456789012");
        assert!(matches!(
            dec.next_event(),
            Err(FrameError::BadHeader(_))
        ));

        dec.reset();
        assert_eq!(dec.buffered(), 0);
        dec.push(&encode_frame(b"fresh session"));
        assert_eq!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(Bytes::from_static(b"fresh session")))
        );
    }

    #[test]
    fn missing_field_is_bad_header() {
        let mut dec = FrameDecoder::new();
        dec.push(b"HDR 12345\n");
        assert!(dec.next_event().is_err());
    }

    #[test]
    fn empty_payload_frame() {
        let mut dec = FrameDecoder::new();
        dec.push(&encode_frame(b""));
        assert_eq!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(Bytes::new()))
        );
    }

    #[test]
    fn waits_for_full_payload() {
        let wire = encode_frame(&[7u8; 1000]);
        let mut dec = FrameDecoder::new();
        dec.push(&wire[..wire.len() - 1]);
        assert_eq!(dec.next_event().unwrap(), None);
        dec.push(&wire[wire.len() - 1..]);
        assert!(matches!(
            dec.next_event().unwrap(),
            Some(FrameEvent::Chunk(_))
        ));
    }
}
