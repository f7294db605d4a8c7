//! Wire frame layout and the streaming reader that reassembles frames from a
//! byte stream that may hand them over in arbitrary chunks.
//!
//! ```text
//! | u32 header_len (LE) | header_bytes (UTF-8 JSON) | payload_0 | payload_1 | ... |
//! ```
//!
//! The header carries a `payloadLengths` array (exact shape depends on
//! `type`); the reader consumes exactly `sum(payloadLengths)` bytes after the
//! header before a frame is considered complete.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::MuxError;

/// One frame's header. `type` is the wire discriminant; field names are
/// camelCase on the wire to match the client side of the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum FrameHeader {
    #[serde(rename = "request")]
    Request {
        request_id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        params: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload_lengths: Option<Vec<u32>>,
    },
    #[serde(rename = "response")]
    Response {
        request_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload_lengths: Option<Vec<u32>>,
    },
    #[serde(rename = "detached")]
    Detached,
    #[serde(rename = "ptyUpdate")]
    PtyUpdate {
        pty_id: Uuid,
        packed: Value,
        scroll_state: Value,
        payload_lengths: Vec<u32>,
    },
    #[serde(rename = "ptyExit")]
    PtyExit {
        pty_id: Uuid,
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        signal: Option<i32>,
    },
    #[serde(rename = "ptyLifecycle")]
    PtyLifecycle { pty_id: Uuid, event: String },
    #[serde(rename = "ptyTitle")]
    PtyTitle { pty_id: Uuid, title: String },
}

impl FrameHeader {
    pub fn request(request_id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        FrameHeader::Request { request_id: request_id.into(), method: method.into(), params, payload_lengths: None }
    }

    pub fn response_ok(request_id: impl Into<String>, result: Option<Value>) -> Self {
        FrameHeader::Response { request_id: request_id.into(), ok: true, result, error: None, payload_lengths: None }
    }

    pub fn response_err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        FrameHeader::Response { request_id: request_id.into(), ok: false, result: None, error: Some(error.into()), payload_lengths: None }
    }

    fn set_payload_lengths(&mut self, lengths: Vec<u32>) {
        match self {
            FrameHeader::Request { payload_lengths, .. } | FrameHeader::Response { payload_lengths, .. } => {
                *payload_lengths = if lengths.is_empty() { None } else { Some(lengths) };
            }
            FrameHeader::PtyUpdate { payload_lengths, .. } => *payload_lengths = lengths,
            FrameHeader::Detached | FrameHeader::PtyExit { .. } | FrameHeader::PtyLifecycle { .. } | FrameHeader::PtyTitle { .. } => {}
        }
    }

    fn payload_lengths(&self) -> Vec<u32> {
        match self {
            FrameHeader::Request { payload_lengths, .. } | FrameHeader::Response { payload_lengths, .. } => {
                payload_lengths.clone().unwrap_or_default()
            }
            FrameHeader::PtyUpdate { payload_lengths, .. } => payload_lengths.clone(),
            FrameHeader::Detached | FrameHeader::PtyExit { .. } | FrameHeader::PtyLifecycle { .. } | FrameHeader::PtyTitle { .. } => Vec::new(),
        }
    }
}

/// A complete frame: header plus its raw payload segments, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payloads: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(header: FrameHeader, payloads: Vec<Vec<u8>>) -> Self {
        Self { header, payloads }
    }

    pub fn header_only(header: FrameHeader) -> Self {
        Self { header, payloads: Vec::new() }
    }

    /// Serializes this frame to its wire representation, filling in
    /// `payloadLengths` from the actual payload sizes.
    pub fn encode(mut self) -> Result<Vec<u8>, MuxError> {
        let lengths: Vec<u32> = self.payloads.iter().map(|p| p.len() as u32).collect();
        self.header.set_payload_lengths(lengths);

        let header_bytes = serde_json::to_vec(&self.header).map_err(|e| MuxError::protocol(e.to_string()))?;
        let payload_total: usize = self.payloads.iter().map(Vec::len).sum();

        let mut out = Vec::with_capacity(4 + header_bytes.len() + payload_total);
        out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        for payload in &self.payloads {
            out.extend_from_slice(payload);
        }
        Ok(out)
    }
}

#[derive(Debug)]
enum ReadState {
    AwaitingHeaderLen,
    AwaitingHeader { header_len: usize },
    AwaitingPayloads { header: FrameHeader, lengths: Vec<u32>, payloads: Vec<Vec<u8>> },
}

/// Streaming frame decoder. Feed it bytes as they arrive from the socket in
/// whatever chunking the transport gives you; call [`FrameReader::next_frame`]
/// after each push to drain any frames that are now complete. Partial frames
/// are retained across calls.
pub struct FrameReader {
    buf: Vec<u8>,
    state: ReadState,
}

impl FrameReader {
    pub fn new() -> Self {
        Self { buf: Vec::new(), state: ReadState::AwaitingHeaderLen }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame buffered so far, or `None` if more
    /// bytes are needed. Call repeatedly after a `push` in case more than one
    /// frame arrived in the same chunk.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, MuxError> {
        loop {
            match std::mem::replace(&mut self.state, ReadState::AwaitingHeaderLen) {
                ReadState::AwaitingHeaderLen => {
                    if self.buf.len() < 4 {
                        self.state = ReadState::AwaitingHeaderLen;
                        return Ok(None);
                    }
                    let len = u32::from_le_bytes(self.buf[..4].try_into().unwrap()) as usize;
                    self.buf.drain(0..4);
                    self.state = ReadState::AwaitingHeader { header_len: len };
                }
                ReadState::AwaitingHeader { header_len } => {
                    if self.buf.len() < header_len {
                        self.state = ReadState::AwaitingHeader { header_len };
                        return Ok(None);
                    }
                    let header_bytes: Vec<u8> = self.buf.drain(0..header_len).collect();
                    let header: FrameHeader =
                        serde_json::from_slice(&header_bytes).map_err(|e| MuxError::parse(e.to_string()))?;
                    let lengths = header.payload_lengths();
                    self.state = ReadState::AwaitingPayloads { header, lengths, payloads: Vec::new() };
                }
                ReadState::AwaitingPayloads { header, lengths, mut payloads } => {
                    while payloads.len() < lengths.len() {
                        let needed = lengths[payloads.len()] as usize;
                        if self.buf.len() < needed {
                            self.state = ReadState::AwaitingPayloads { header, lengths, payloads };
                            return Ok(None);
                        }
                        payloads.push(self.buf.drain(0..needed).collect());
                    }
                    self.state = ReadState::AwaitingHeaderLen;
                    return Ok(Some(Frame { header, payloads }));
                }
            }
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_header_only_frame() {
        let frame = Frame::header_only(FrameHeader::Detached);
        let bytes = frame.clone().encode().unwrap();

        let mut reader = FrameReader::new();
        reader.push(&bytes);
        let decoded = reader.next_frame().unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn round_trips_a_frame_with_payloads() {
        let header = FrameHeader::PtyUpdate {
            pty_id: Uuid::new_v4(),
            packed: serde_json::json!({"cursorRow": 0, "cursorCol": 0}),
            scroll_state: serde_json::json!({"offset": 0}),
            payload_lengths: Vec::new(),
        };
        let frame = Frame::new(header, vec![vec![1, 2, 3], vec![], vec![9; 50]]);
        let bytes = frame.clone().encode().unwrap();

        let mut reader = FrameReader::new();
        reader.push(&bytes);
        let decoded = reader.next_frame().unwrap().unwrap();

        match &decoded.header {
            FrameHeader::PtyUpdate { payload_lengths, .. } => assert_eq!(payload_lengths, &vec![3, 0, 50]),
            other => panic!("unexpected header: {other:?}"),
        }
        assert_eq!(decoded.payloads, vec![vec![1, 2, 3], vec![], vec![9; 50]]);
    }

    #[test]
    fn reassembles_a_frame_split_across_many_small_pushes() {
        let frame = Frame::new(
            FrameHeader::request("req-1", "createPty", Some(serde_json::json!({"cols": 80}))),
            vec![b"payload-bytes".to_vec()],
        );
        let bytes = frame.clone().encode().unwrap();

        let mut reader = FrameReader::new();
        let mut found = None;
        for chunk in bytes.chunks(3) {
            reader.push(chunk);
            while let Some(f) = reader.next_frame().unwrap() {
                found = Some(f);
            }
        }
        assert_eq!(found.unwrap(), frame);
    }

    #[test]
    fn two_frames_concatenated_in_one_push_both_decode() {
        let a = Frame::header_only(FrameHeader::response_ok("r1", None));
        let b = Frame::header_only(FrameHeader::response_err("r2", "boom"));
        let mut bytes = a.clone().encode().unwrap();
        bytes.extend(b.clone().encode().unwrap());

        let mut reader = FrameReader::new();
        reader.push(&bytes);
        assert_eq!(reader.next_frame().unwrap().unwrap(), a);
        assert_eq!(reader.next_frame().unwrap().unwrap(), b);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_header_length_prefix_waits_for_more_bytes() {
        let mut reader = FrameReader::new();
        reader.push(&[1, 2]);
        assert!(reader.next_frame().unwrap().is_none());
        reader.push(&[0, 0]);
        // header_len now complete as 0x00000201 little-endian == large, header bytes not present
        assert!(reader.next_frame().unwrap().is_none());
    }
}
