//! Line/RPC framer: newline-delimited JSON-RPC over a byte stream.
//!
//! Owns the receive buffer, the outbound line encoder, message ID minting,
//! and the `id -> method` table needed to tell a server response from a
//! server-initiated notification and to know what request a response
//! belongs to. Nothing here knows about Stratum method semantics — that's
//! the protocol layer above.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

pub type MessageId = u64;

/// Largest single line accepted from the wire before the connection is
/// considered corrupt.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A decoded inbound frame, with server-initiated calls and tracked
/// responses already told apart.
#[derive(Debug, Clone)]
pub enum RpcFrame {
    /// A server-initiated call. Carries no response obligation.
    Notification { method: String, params: Vec<Value> },
    /// A response to a request this connection sent, matched by ID.
    Response {
        id: MessageId,
        method: String,
        outcome: std::result::Result<Value, Value>,
    },
}

/// Newline-delimited JSON encoder/decoder plus ID bookkeeping.
pub struct Framer {
    recv_buf: Vec<u8>,
    next_id: MessageId,
    pending: HashMap<MessageId, String>,
    max_line_len: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            recv_buf: Vec::new(),
            next_id: 0,
            pending: HashMap::new(),
            max_line_len,
        }
    }

    /// Builds the wire bytes for a new request, mints its ID, and records
    /// `id -> method` so a later response can be correlated and typed.
    pub fn encode_request(&mut self, method: &str, params: Vec<Value>) -> (MessageId, Vec<u8>) {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, method.to_string());

        let line = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let mut bytes = serde_json::to_vec(&line).expect("Value always serializes");
        bytes.push(b'\n');
        (id, bytes)
    }

    /// Appends freshly-received bytes and decodes every complete line now
    /// present in the buffer, in order. Partial frames remain buffered for
    /// the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<RpcFrame>> {
        self.recv_buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let Some(newline_at) = self.recv_buf.iter().position(|&b| b == b'\n') else {
                if self.recv_buf.len() > self.max_line_len {
                    return Err(Error::Framing(format!(
                        "line exceeded {} bytes without a terminator",
                        self.max_line_len
                    )));
                }
                break;
            };
            if newline_at > self.max_line_len {
                return Err(Error::Framing(format!(
                    "line of {newline_at} bytes exceeds the {}-byte limit",
                    self.max_line_len
                )));
            }

            let line: Vec<u8> = self.recv_buf.drain(..=newline_at).collect();
            let line = &line[..line.len() - 1]; // drop the newline itself
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            if let Some(frame) = self.decode_line(line)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<RpcFrame>> {
        let value: Value = serde_json::from_slice(line)
            .map_err(|e| Error::Framing(format!("malformed JSON line: {e}")))?;

        let obj = value
            .as_object()
            .ok_or_else(|| Error::ProtocolShape("top-level JSON value was not an object".into()))?;

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let params = obj
                .get("params")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            return Ok(Some(RpcFrame::Notification {
                method: method.to_string(),
                params,
            }));
        }

        let Some(id) = obj.get("id").and_then(Value::as_u64) else {
            log::warn!(target: "stratum", "dropping response-shaped line with no usable id: {value}");
            return Ok(None);
        };

        let Some(method) = self.pending.remove(&id) else {
            log::warn!(target: "stratum", "dropping response for unknown id {id}");
            return Ok(None);
        };

        let outcome = match obj.get("error") {
            Some(err) if !err.is_null() => Err(err.clone()),
            _ => Ok(obj.get("result").cloned().unwrap_or(Value::Null)),
        };

        Ok(Some(RpcFrame::Response { id, method, outcome }))
    }

    /// Forgets a pending call without waiting for its response, used when
    /// the façade gives up on a call before the wire does.
    pub fn forget(&mut self, id: MessageId) {
        self.pending.remove(&id);
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_strictly_increasing_ids() {
        let mut framer = Framer::new();
        let (id0, _) = framer.encode_request("mining.subscribe", vec![]);
        let (id1, _) = framer.encode_request("mining.authorize", vec![]);
        assert!(id1 > id0);
    }

    #[test]
    fn decodes_notification() {
        let mut framer = Framer::new();
        let line = b"{\"id\":null,\"method\":\"mining.notify\",\"params\":[1,2,3]}\n";
        let frames = framer.feed(line).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            RpcFrame::Notification { method, params } => {
                assert_eq!(method, "mining.notify");
                assert_eq!(params.len(), 3);
            }
            _ => panic!("expected a notification"),
        }
    }

    #[test]
    fn correlates_response_to_request() {
        let mut framer = Framer::new();
        let (id, _) = framer.encode_request("mining.subscribe", vec![]);
        let line = format!("{{\"id\":{id},\"error\":null,\"result\":[[],\"nonce1\",4]}}\n");
        let frames = framer.feed(line.as_bytes()).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            RpcFrame::Response { id: got_id, method, outcome } => {
                assert_eq!(*got_id, id);
                assert_eq!(method, "mining.subscribe");
                assert!(outcome.is_ok());
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn drops_response_for_unknown_id() {
        let mut framer = Framer::new();
        let line = b"{\"id\":999,\"error\":null,\"result\":true}\n";
        let frames = framer.feed(line).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn error_responses_are_routed_as_err() {
        let mut framer = Framer::new();
        let (id, _) = framer.encode_request("mining.authorize", vec![]);
        let line = format!("{{\"id\":{id},\"error\":[21,\"unauthorized\",null],\"result\":null}}\n");
        let frames = framer.feed(line.as_bytes()).unwrap();
        match &frames[0] {
            RpcFrame::Response { outcome, .. } => {
                let err = outcome.clone().unwrap_err();
                assert_eq!(err, serde_json::json!([21, "unauthorized", null]));
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn processes_multiple_lines_in_order() {
        let mut framer = Framer::new();
        let (id0, _) = framer.encode_request("mining.subscribe", vec![]);
        let (id1, _) = framer.encode_request("mining.authorize", vec![]);
        let input = format!(
            "{{\"id\":{id0},\"error\":null,\"result\":1}}\n{{\"id\":{id1},\"error\":null,\"result\":2}}\n"
        );
        let frames = framer.feed(input.as_bytes()).unwrap();
        assert_eq!(frames.len(), 2);
        let RpcFrame::Response { id: got0, .. } = &frames[0] else { panic!() };
        let RpcFrame::Response { id: got1, .. } = &frames[1] else { panic!() };
        assert_eq!(*got0, id0);
        assert_eq!(*got1, id1);
    }

    #[test]
    fn oversized_line_is_a_framing_error() {
        let mut framer = Framer::with_max_line_len(16);
        let huge = vec![b'a'; 64];
        let err = framer.feed(&huge).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn malformed_json_is_a_framing_error() {
        let mut framer = Framer::new();
        let err = framer.feed(b"not json\n").unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }
}
