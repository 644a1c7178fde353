//! Command encoding and CRLF frame decoding.
//!
//! Outbound commands are single JSON objects terminated by `\r\n`. Inbound
//! bytes arrive in arbitrary chunks; [`FrameDecoder`] keeps the carry-over
//! between reads and yields one [`Frame`] per complete line.

use crate::error::{ScopeError, ScopeResult};
use crate::model::{CommandEnvelope, Frame};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Frame terminator on the wire.
pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// A command ready for the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedCommand {
    pub envelope: CommandEnvelope,
    /// Serialized envelope including the trailing `\r\n`.
    pub bytes: Vec<u8>,
}

impl EncodedCommand {
    pub fn id(&self) -> u64 {
        self.envelope.id
    }
}

/// Allocates command ids and serializes envelopes.
///
/// Ids start at the configured base and only ever increase; an id is
/// consumed even when serialization fails.
#[derive(Debug)]
pub struct CommandCodec {
    next_id: AtomicU64,
}

impl CommandCodec {
    pub fn new(base: u64) -> Self {
        Self {
            next_id: AtomicU64::new(base),
        }
    }

    /// Id the next `encode` call will assign.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn encode(&self, method: &str, params: Option<Value>) -> ScopeResult<EncodedCommand> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let envelope = CommandEnvelope {
            id,
            method: method.to_string(),
            params,
        };
        let mut bytes = serde_json::to_vec(&envelope).map_err(|err| {
            ScopeError::protocol(
                format!("failed to serialize {method}"),
                serde_json::json!({ "source": err.to_string() }),
            )
        })?;
        bytes.extend_from_slice(FRAME_TERMINATOR);
        Ok(EncodedCommand { envelope, bytes })
    }
}

/// Extract the first complete frame from `buffer`.
///
/// Returns `None` when no terminator is present yet. Otherwise returns the
/// decode result for the first line and the unconsumed remainder. A blank
/// line is a protocol error here; [`FrameDecoder`] skips them.
pub fn decode_frame(buffer: &[u8]) -> Option<(ScopeResult<Frame>, &[u8])> {
    let end = find_terminator(buffer)?;
    let line = buffer.get(..end)?;
    let rest = buffer.get(end + FRAME_TERMINATOR.len()..)?;
    Some((parse_frame(line), rest))
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(FRAME_TERMINATOR.len())
        .position(|window| window == FRAME_TERMINATOR)
}

fn parse_frame(line: &[u8]) -> ScopeResult<Frame> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(fields)) => Ok(Frame::new(fields)),
        Ok(other) => Err(ScopeError::protocol(
            "frame is not a JSON object",
            serde_json::json!({ "frame": other }),
        )),
        Err(err) => Err(ScopeError::protocol(
            "malformed JSON frame",
            serde_json::json!({
                "source": err.to_string(),
                "frame": String::from_utf8_lossy(line),
            }),
        )),
    }
}

/// Reassembles frames from partial socket reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete frame, skipping blank lines. `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<ScopeResult<Frame>> {
        loop {
            let end = find_terminator(&self.pending)?;
            let line: Vec<u8> = self
                .pending
                .drain(..end + FRAME_TERMINATOR.len())
                .take(end)
                .collect();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(parse_frame(&line));
        }
    }

    /// Bytes still waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial frame. Returns how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn ids_start_at_base_and_increase() {
        let codec = CommandCodec::new(999);
        let ids: Vec<u64> = (0..50)
            .filter_map(|_| codec.encode("test_connection", None).ok())
            .map(|cmd| cmd.id())
            .collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(ids.first(), Some(&999));
        assert!(ids.windows(2).all(|pair| pair.first() < pair.get(1)));
        assert_eq!(codec.peek_next_id(), 1049);
    }

    #[test]
    fn encoded_line_ends_with_crlf() {
        let codec = CommandCodec::new(1);
        let cmd = codec
            .encode("iscope_start_stack", Some(serde_json::json!({"restart": true})))
            .ok();
        let text = cmd.map(|c| String::from_utf8_lossy(&c.bytes).into_owned()).unwrap_or_default();
        assert_eq!(
            text,
            "{\"id\":1,\"method\":\"iscope_start_stack\",\"params\":{\"restart\":true}}\r\n"
        );
    }

    #[test]
    fn decode_frame_returns_remainder() {
        let buffer = b"{\"a\":1}\r\n{\"b\":";
        let (frame, rest) = decode_frame(buffer).unwrap_or((Err(ScopeError::internal("none")), b""));
        assert!(frame.is_ok());
        assert_eq!(rest, b"{\"b\":");
        assert!(decode_frame(rest).is_none());
    }

    #[test]
    fn malformed_frame_does_not_poison_following_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"{not json}\r\n[1,2]\r\n\r\n{\"Event\":\"AutoGoto\",\"state\":\"complete\"}\r\n");
        let first = decoder.next_frame();
        assert_eq!(first.and_then(Result::err).map(|e| e.code), Some(ErrorCode::Protocol));
        let second = decoder.next_frame();
        assert_eq!(second.and_then(Result::err).map(|e| e.code), Some(ErrorCode::Protocol));
        let third = decoder.next_frame().and_then(Result::ok);
        assert_eq!(third.and_then(|f| f.state().map(str::to_string)), Some("complete".to_string()));
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn split_terminator_waits_for_newline() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"{\"id\":1}\r");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"\n");
        assert!(decoder.next_frame().is_some_and(|f| f.is_ok()));
    }

    fn drain(decoder: &mut FrameDecoder, into: &mut Vec<Option<Frame>>) {
        while let Some(decoded) = decoder.next_frame() {
            into.push(decoded.ok());
        }
    }

    #[test]
    fn every_split_point_decodes_like_the_whole_stream() {
        let stream = "{\"method\":\"scope_get_equ_coord\",\"result\":{\"ra\":13.4,\"dec\":47.2}}\r\n\
                      {\"Event\":\"Stack\",\"target_name\":\"Ω Cen\",\"note\":\"η Car → done\"}\r\n\
                      {\"Event\":\"AutoGoto\",\"state\":\"complete\"}\r\n"
            .as_bytes();

        let mut whole = FrameDecoder::new();
        whole.push(stream);
        let mut expected = Vec::new();
        drain(&mut whole, &mut expected);
        assert_eq!(expected.len(), 3);
        assert!(expected.iter().all(Option::is_some));
        let name = expected
            .get(1)
            .and_then(Option::as_ref)
            .and_then(|f| f.fields().get("target_name").cloned());
        assert_eq!(name, Some(serde_json::json!("Ω Cen")));

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            decoder.push(stream.get(..split).unwrap_or_default());
            drain(&mut decoder, &mut frames);
            decoder.push(stream.get(split..).unwrap_or_default());
            drain(&mut decoder, &mut frames);
            assert_eq!(frames, expected, "split at byte {split}");
            assert_eq!(decoder.pending_len(), 0, "split at byte {split}");
        }

        let mut trickle = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in stream.chunks(1) {
            trickle.push(byte);
            drain(&mut trickle, &mut frames);
        }
        assert_eq!(frames, expected);
    }

    #[test]
    fn clear_discards_partial_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"{\"Event\":\"AutoGoto\",\"sta");
        assert_eq!(decoder.clear(), 24);
        decoder.push(b"{\"Event\":\"AutoGoto\",\"state\":\"complete\"}\r\n");
        let frame = decoder.next_frame().and_then(Result::ok);
        assert_eq!(frame.and_then(|f| f.goto_outcome()), Some(crate::model::OperationState::Complete));
        assert_eq!(decoder.clear(), 0);
    }
}
