//! Single-shot HTTP transport, used when no socket is connected.

use crate::error::ClientError;
use duorpc_protocol::{CallMessage, HttpError, HttpReply};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

/// POSTs JSON-encoded call messages to the service's HTTP endpoint.
pub struct OneShot {
    base: String,
    http: reqwest::Client,
}

impl OneShot {
    pub fn new(base: String) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    /// Sends one call and returns the decoded `response` payload.
    ///
    /// A non-200 status surfaces the server-supplied `message` as
    /// [`ClientError::Server`]; an unparsable error body degrades to the
    /// status code.
    pub async fn send(&self, msg: &CallMessage, path_prefix: &str) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base, path_prefix);
        debug!(%url, id = msg.id, rpc = %msg.rpc, "sending single-shot call");

        let resp = self.http.post(&url).json(msg).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let message = match resp.json::<HttpError>().await {
                Ok(body) => body.message,
                Err(_) => format!("HTTP {status}"),
            };
            return Err(ClientError::Server { message });
        }

        let reply: HttpReply = resp.json().await?;
        Ok(reply.response)
    }
}
