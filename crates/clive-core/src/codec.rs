//! Newline-delimited JSON framing.
//!
//! Each frame is one UTF-8 JSON document followed by `\n`. `serde_json`
//! never emits a raw newline inside a document, so the delimiter is
//! unambiguous. Blank lines are skipped.
//!
//! Decoding yields `Ok(T)` for well-formed frames and `Err(MalformedFrame)`
//! for anything else that ends in a delimiter: invalid JSON, invalid UTF-8,
//! the wrong shape, or a line over the size cap. An oversized line is
//! reported once and then discarded through its newline, so the stream keeps
//! going. Only I/O failures are fatal [`CodecError`]s.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use serde_json::Value;

/// A line that was not a valid frame of the expected type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedFrame {
    /// `id` recovered from the raw JSON, if any.
    pub id: Option<String>,
    /// Decoder error text.
    pub message: String,
}

/// One decoded frame.
pub type Frame<T> = Result<T, MalformedFrame>;

/// Fatal framing errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serializing an outbound frame failed.
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    /// Socket I/O failed.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

enum RawLine {
    Line(BytesMut),
    Oversized,
}

/// Typed newline-delimited JSON codec: decodes `In`, encodes `Out`.
#[derive(Debug)]
pub struct JsonLinesCodec<In, Out> {
    max: usize,
    /// Bytes already scanned for a newline.
    next_index: usize,
    /// Dropping the tail of an oversized line.
    discarding: bool,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<In, Out> JsonLinesCodec<In, Out> {
    /// Codec rejecting lines longer than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max: max_frame_bytes,
            next_index: 0,
            discarding: false,
            _marker: PhantomData,
        }
    }

    fn next_line(&mut self, src: &mut BytesMut) -> Option<RawLine> {
        loop {
            let read_to = src.len().min(self.max.saturating_add(1));
            let newline = src[self.next_index..read_to].iter().position(|b| *b == b'\n');
            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return None;
                    }
                }
                (false, Some(offset)) => {
                    let at = self.next_index + offset;
                    self.next_index = 0;
                    let mut line = src.split_to(at + 1);
                    line.truncate(at);
                    if line.last() == Some(&b'\r') {
                        line.truncate(at - 1);
                    }
                    return Some(RawLine::Line(line));
                }
                (false, None) if src.len() > self.max => {
                    self.next_index = 0;
                    self.discarding = true;
                    return Some(RawLine::Oversized);
                }
                (false, None) => {
                    self.next_index = read_to;
                    return None;
                }
            }
        }
    }

    fn oversized(&self) -> MalformedFrame {
        MalformedFrame {
            id: None,
            message: format!("frame exceeds {} bytes", self.max),
        }
    }
}

/// Best-effort `id` recovery from a line that failed to decode.
pub fn recover_id(raw: impl AsRef<[u8]>) -> Option<String> {
    let value: Value = serde_json::from_slice(raw.as_ref()).ok()?;
    value.get("id").and_then(Value::as_str).map(str::to_owned)
}

fn parse<T: DeserializeOwned>(line: &[u8]) -> Frame<T> {
    serde_json::from_slice(line).map_err(|e| MalformedFrame {
        id: recover_id(line),
        message: e.to_string(),
    })
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

impl<In: DeserializeOwned, Out> Decoder for JsonLinesCodec<In, Out> {
    type Item = Frame<In>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.next_line(src) {
                None => return Ok(None),
                Some(RawLine::Oversized) => return Ok(Some(Err(self.oversized()))),
                Some(RawLine::Line(line)) if is_blank(&line) => {}
                Some(RawLine::Line(line)) => return Ok(Some(parse(&line))),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        let rest = src.split();
        if is_blank(&rest) {
            return Ok(None);
        }
        Ok(Some(parse(&rest)))
    }
}

impl<In, Out: Serialize> Encoder<Out> for JsonLinesCodec<In, Out> {
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_vec(&item)?;
        dst.reserve(line.len() + 1);
        dst.put_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Call {
        id: String,
        method: String,
    }

    type ServerCodec = JsonLinesCodec<Call, Value>;

    #[test]
    fn decodes_consecutive_frames() {
        let mut codec = ServerCodec::new(1024);
        let mut buf = BytesMut::from(
            "{\"id\":\"1\",\"method\":\"a\",\"params\":1}\n\n{\"id\":\"2\",\"method\":\"b\"}\n",
        );
        let first = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(first.id, "1");
        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(second.method, "b");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_delimiter() {
        let mut codec = ServerCodec::new(1024);
        let mut buf = BytesMut::from("{\"id\":\"1\",\"meth");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"od\":\"a\"}\n");
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_ok());
    }

    #[test]
    fn malformed_frame_is_an_item_not_an_error() {
        let mut codec = ServerCodec::new(1024);
        let mut buf = BytesMut::from("{\"id\":\"9\",\"params\":{}}\nnot json\n");
        let bad = codec.decode(&mut buf).unwrap().unwrap().unwrap_err();
        assert_eq!(bad.id.as_deref(), Some("9"));
        let worse = codec.decode(&mut buf).unwrap().unwrap().unwrap_err();
        assert_eq!(worse.id, None);
    }

    #[test]
    fn oversized_line_is_reported_then_skipped() {
        let mut codec = ServerCodec::new(64);
        let mut buf = BytesMut::from(format!("{{\"id\":\"{}\"}}\n", "x".repeat(100)).as_str());
        buf.extend_from_slice(b"{\"id\":\"2\",\"method\":\"b\"}\n");
        let bad = codec.decode(&mut buf).unwrap().unwrap().unwrap_err();
        assert_eq!(bad.message, "frame exceeds 64 bytes");
        assert_eq!(bad.id, None);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().id, "2");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_line_split_across_reads() {
        let mut codec = ServerCodec::new(24);
        let mut buf = BytesMut::from("0".repeat(30).as_str());
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_err());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"abc\n{\"id\":\"1\",\"method\":\"a\"}\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().id, "1");
    }

    #[test]
    fn invalid_utf8_is_an_item_not_an_error() {
        let mut codec = ServerCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"id\":\"u\",\"method\":\"a\",\"params\":\"\xff\"}\n"[..]);
        buf.extend_from_slice(b"{\"id\":\"2\",\"method\":\"b\"}\r\n");
        let bad = codec.decode(&mut buf).unwrap().unwrap().unwrap_err();
        assert_eq!(bad.id, None);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap().method, "b");
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = ServerCodec::new(1024);
        let mut buf = BytesMut::new();
        codec
            .encode(json!({"id": "1", "result": {"a": "line\nbreak"}}), &mut buf)
            .unwrap();
        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }

    #[test]
    fn recover_id_from_partial_envelope() {
        assert_eq!(recover_id(r#"{"id":"7","params":{}}"#).as_deref(), Some("7"));
        assert_eq!(recover_id(r#"{"id":7}"#), None);
        assert_eq!(recover_id("not json"), None);
    }

    #[test]
    fn final_frame_without_newline_decodes_at_eof() {
        let mut codec = ServerCodec::new(1024);
        let mut buf = BytesMut::from("{\"id\":\"1\",\"method\":\"a\"}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.decode_eof(&mut buf).unwrap().unwrap().is_ok());
    }
}
