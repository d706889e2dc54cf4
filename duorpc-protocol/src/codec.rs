//! Text-frame encoding and decoding.
//!
//! Both transports carry plain JSON; WebSocket text frames already
//! delimit messages, so no length framing is involved.

use crate::error::ProtocolError;
use crate::message::{CallMessage, Envelope};
use serde_json::Value;

/// Encodes a call message into a text frame.
pub fn encode_call(msg: &CallMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes an inbound text frame into a reply envelope.
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let frame: Value = serde_json::from_str(text)?;
    Envelope::from_value(frame)
}
