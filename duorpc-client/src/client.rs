//! High-level client API: configuration, endpoint derivation, and
//! one-time transport selection.

use crate::error::ClientError;
use crate::http::OneShot;
use crate::session::{CallChain, Session};
use crate::table::CallInfo;
use duorpc_protocol::CallMessage;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Default service address.
pub const DEFAULT_HOSTPORT: &str = "localhost:9000";

/// Default base path.
pub const DEFAULT_BASE_PATH: &str = "/";

/// Default path prefix for RPC endpoints.
pub const DEFAULT_RPC_PATH: &str = "/rpc";

/// Default delay before a reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Default grace period before a finished call's record is pruned.
pub const DEFAULT_FINALIZE_AFTER: Duration = Duration::from_millis(1000);

/// Client configuration. Immutable once the client is constructed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service address as `host:port`.
    pub hostport: String,
    /// Base path prepended to every endpoint path.
    pub base_path: String,
    /// Derive `https`/`wss` URLs instead of `http`/`ws`.
    pub tls: bool,
    /// Delay before each reconnection attempt.
    pub reconnect_delay: Duration,
    /// Grace period before finished call records are pruned;
    /// `None` disables pruning.
    pub finalize_after: Option<Duration>,
}

impl ClientConfig {
    pub fn new(hostport: impl Into<String>) -> Self {
        Self {
            hostport: hostport.into(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            tls: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            finalize_after: Some(DEFAULT_FINALIZE_AFTER),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_finalize_after(mut self, grace: Option<Duration>) -> Self {
        self.finalize_after = grace;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTPORT)
    }
}

/// Base URLs derived once from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub http_base: String,
    pub ws_base: String,
}

impl Endpoint {
    fn derive(config: &ClientConfig) -> Self {
        let tls = if config.tls { "s" } else { "" };
        // Normalized so joining a path prefix never doubles the slash.
        let base = config.base_path.trim_end_matches('/');
        Self {
            http_base: format!("http{}://{}{}", tls, config.hostport, base),
            ws_base: format!("ws{}://{}{}", tls, config.hostport, base),
        }
    }
}

/// Dual-transport RPC client.
///
/// Calls go over the WebSocket when one is connected and over single-shot
/// HTTP otherwise. The transport is selected once per call.
pub struct Client {
    endpoint: Endpoint,
    session: Session,
    oneshot: OneShot,
    next_id: AtomicU64,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let endpoint = Endpoint::derive(&config);
        Self {
            oneshot: OneShot::new(endpoint.http_base.clone()),
            session: Session::new(config.reconnect_delay, config.finalize_after),
            next_id: AtomicU64::new(0),
            endpoint,
        }
    }

    /// The derived base URLs.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns whether a live socket is installed.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Number of outstanding call records.
    pub async fn pending_calls(&self) -> usize {
        self.session.pending_calls().await
    }

    /// Connects the socket at the default RPC path.
    pub async fn connect_ws(&self) -> Result<(), ClientError> {
        self.connect_ws_on(DEFAULT_RPC_PATH).await
    }

    /// Connects the socket at `<ws_base><path_prefix>`, idempotently
    /// replacing any existing connection.
    pub async fn connect_ws_on(&self, path_prefix: &str) -> Result<(), ClientError> {
        let url = format!("{}{}", self.endpoint.ws_base, path_prefix);
        self.session.connect(url).await
    }

    /// Closes the socket and suppresses further auto-reconnection.
    pub async fn disconnect_ws(&self) {
        self.session.disconnect().await;
    }

    /// Sends a call at the default RPC path and returns the first reply.
    pub async fn send_rpc(&self, rpc: &str, request: Value) -> Result<Value, ClientError> {
        self.send_rpc_on(rpc, request, DEFAULT_RPC_PATH).await
    }

    /// Sends a call and returns the first reply payload.
    ///
    /// The transport is decided here, once: a connected socket carries
    /// the call through the correlation table; otherwise it goes out as
    /// a single-shot POST to `<http_base><path_prefix>`. The decision is
    /// never re-evaluated mid-call and there is no fallback between the
    /// two paths.
    pub async fn send_rpc_on(
        &self,
        rpc: &str,
        request: Value,
        path_prefix: &str,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(id, rpc, socket = self.is_connected(), "sending RPC call");

        if self.is_connected() {
            let call = CallInfo {
                id,
                rpc: rpc.to_string(),
                request,
            };
            let mut chain = self.session.send_call(call).await?;
            let first = chain.next().await?;
            Ok(first.payload)
        } else {
            let msg = CallMessage::new(id, rpc).with_request(request);
            self.oneshot.send(&msg, path_prefix).await
        }
    }

    /// Sends a call over the socket and returns the chain handle, so
    /// every follow-up reply can be awaited in order.
    ///
    /// Fails with [`ClientError::NotConnected`] when no socket is up;
    /// follow-up chains only exist on the socket transport.
    pub async fn send_rpc_chain(&self, rpc: &str, request: Value) -> Result<CallChain, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let call = CallInfo {
            id,
            rpc: rpc.to_string(),
            request,
        };
        self.session.send_call(call).await
    }
}
