//! JSON message types for calls and replies.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound call message, sent over both transports.
///
/// Serialized as `{ "id": <u64>, "rpc": <name>, "request": <payload> }`;
/// the `request` member is omitted when the payload is JSON null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    /// Request identity, assigned at send time.
    pub id: u64,

    /// Name of the remote procedure.
    pub rpc: String,

    /// Call payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub request: Value,
}

impl CallMessage {
    pub fn new(id: u64, rpc: impl Into<String>) -> Self {
        Self {
            id,
            rpc: rpc.into(),
            request: Value::Null,
        }
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }
}

/// Inbound reply payload, classified once at decode time.
///
/// A payload that carries a numeric `id` member re-keys the call: the next
/// reply in the chain will arrive under that identity. A payload without
/// one is terminal; nothing further can be routed to the call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Single reply; the chain ends here.
    Terminal(Value),

    /// Reply that continues the chain under a new identity.
    ///
    /// `payload` is the full response object as it appeared on the wire,
    /// `id` member included.
    Continues { payload: Value, next_id: u64 },
}

impl Reply {
    /// Classifies a raw response payload.
    pub fn classify(payload: Value) -> Self {
        match payload
            .as_object()
            .and_then(|obj| obj.get("id"))
            .and_then(Value::as_u64)
        {
            Some(next_id) => Reply::Continues { payload, next_id },
            None => Reply::Terminal(payload),
        }
    }

    /// The reply payload, whichever variant this is.
    pub fn payload(&self) -> &Value {
        match self {
            Reply::Terminal(payload) => payload,
            Reply::Continues { payload, .. } => payload,
        }
    }

    /// Consumes the reply, returning its payload.
    pub fn into_payload(self) -> Value {
        match self {
            Reply::Terminal(payload) => payload,
            Reply::Continues { payload, .. } => payload,
        }
    }

    /// The continuation identity, if the chain continues.
    pub fn continues_at(&self) -> Option<u64> {
        match self {
            Reply::Terminal(_) => None,
            Reply::Continues { next_id, .. } => Some(*next_id),
        }
    }
}

/// Decoded inbound socket frame: `{ "id": <u64>, "response": <payload> }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Identity this reply answers: either a request identity (first
    /// reply) or a continuation identity (follow-up reply).
    pub id: u64,

    /// The classified reply.
    pub reply: Reply,
}

impl Envelope {
    /// Builds an envelope from a decoded JSON frame.
    pub fn from_value(frame: Value) -> Result<Self, ProtocolError> {
        let id = frame
            .get("id")
            .ok_or(ProtocolError::MissingField("id"))?
            .as_u64()
            .ok_or(ProtocolError::InvalidField("id"))?;

        // A missing response behaves like a null one.
        let payload = frame.get("response").cloned().unwrap_or(Value::Null);

        Ok(Self {
            id,
            reply: Reply::classify(payload),
        })
    }
}

/// Single-shot HTTP body on status 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpReply {
    pub response: Value,
}

/// Single-shot HTTP body on any other status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpError {
    pub message: String,
}
