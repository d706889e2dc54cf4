//! WebSocket session management.
//!
//! The session owns zero-or-one live socket, the correlation table, and
//! the reconnect loop. Inbound frames are dispatched on a reader task;
//! a malformed or unroutable frame is logged and dropped, never fatal.

use crate::error::ClientError;
use crate::table::{CallInfo, FollowUp, PendingTable};
use duorpc_protocol::{codec, CallMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection lifecycle. At most one live socket exists at a time; `seq`
/// identifies it so a stale closure cannot tear down its replacement.
enum ConnState {
    Disconnected,
    Connecting,
    Connected { url: String, seq: u64, sink: WsSink },
    AwaitingRetry,
}

struct Shared {
    /// Outstanding call records; dispatch runs only on the reader task.
    table: Mutex<PendingTable>,
    state: Mutex<ConnState>,
    /// URL the session wants connected. `None` suppresses reconnection.
    desired_url: Mutex<Option<String>>,
    /// Cancellable retry timer task.
    retry: std::sync::Mutex<Option<JoinHandle<()>>>,
    conn_seq: AtomicU64,
    connected: AtomicBool,
    reconnect_delay: Duration,
    finalize_after: Option<Duration>,
}

/// Owns the socket connection, the correlation table, and reconnection.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(reconnect_delay: Duration, finalize_after: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(PendingTable::new()),
                state: Mutex::new(ConnState::Disconnected),
                desired_url: Mutex::new(None),
                retry: std::sync::Mutex::new(None),
                conn_seq: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                reconnect_delay,
                finalize_after,
            }),
        }
    }

    /// Returns whether a live socket is installed.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Number of outstanding call records.
    pub async fn pending_calls(&self) -> usize {
        self.shared.table.lock().await.len()
    }

    /// Opens the socket at `url`, replacing any existing connection.
    ///
    /// Returns once the handshake completes; a handshake failure settles
    /// the session back to disconnected with reconnection suppressed.
    pub async fn connect(&self, url: String) -> Result<(), ClientError> {
        teardown(&self.shared).await;

        *self.shared.desired_url.lock().await = Some(url.clone());
        *self.shared.state.lock().await = ConnState::Connecting;

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                if install(&self.shared, url, ws).await {
                    Ok(())
                } else {
                    // Torn down while the handshake was in flight.
                    Err(ClientError::ConnectionClosed)
                }
            }
            Err(err) => {
                warn!(%url, error = %err, "error establishing websocket connection");
                *self.shared.desired_url.lock().await = None;
                *self.shared.state.lock().await = ConnState::Disconnected;
                Err(err.into())
            }
        }
    }

    /// Closes the socket and suppresses further reconnection.
    pub async fn disconnect(&self) {
        teardown(&self.shared).await;
    }

    /// Registers a call record and writes the message to the socket.
    ///
    /// The record is registered before the write so a fast reply cannot
    /// miss it; a failed write removes it again.
    pub async fn send_call(&self, call: CallInfo) -> Result<CallChain, ClientError> {
        let msg = CallMessage::new(call.id, call.rpc.clone()).with_request(call.request.clone());
        let encoded = codec::encode_call(&msg)?;

        let mut state = self.shared.state.lock().await;
        let ConnState::Connected { sink, .. } = &mut *state else {
            return Err(ClientError::NotConnected);
        };

        self.shared.table.lock().await.register(call.clone());
        if let Err(err) = sink.send(Message::text(encoded)).await {
            self.shared.table.lock().await.remove(call.id);
            return Err(err.into());
        }
        debug!(id = call.id, rpc = %call.rpc, "call sent over websocket");

        Ok(CallChain {
            call: msg,
            shared: Arc::clone(&self.shared),
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut retry) = self.shared.retry.lock() {
            if let Some(handle) = retry.take() {
                handle.abort();
            }
        }
    }
}

/// Handle to a socket call's follow-up chain, yielding replies in order.
pub struct CallChain {
    call: CallMessage,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CallChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallChain").field("call", &self.call).finish()
    }
}

impl CallChain {
    /// Request identity of the underlying call.
    pub fn id(&self) -> u64 {
        self.call.id
    }

    /// Waits for the next follow-up reply on this call's chain.
    pub async fn next(&mut self) -> Result<FollowUp, ClientError> {
        let rx: Option<oneshot::Receiver<FollowUp>> =
            self.shared.table.lock().await.take_receiver(self.call.id);
        match rx {
            Some(rx) => rx.await.map_err(|_| ClientError::ConnectionClosed),
            None => Err(ClientError::ChainClosed),
        }
    }
}

/// Tears everything down: cancels the retry timer, clears the desired
/// URL, closes the sink, and fails all in-flight call records.
async fn teardown(shared: &Arc<Shared>) {
    *shared.desired_url.lock().await = None;
    if let Some(handle) = shared.retry.lock().ok().and_then(|mut h| h.take()) {
        handle.abort();
    }

    shared.connected.store(false, Ordering::SeqCst);
    let prev = std::mem::replace(&mut *shared.state.lock().await, ConnState::Disconnected);
    if let ConnState::Connected { url, mut sink, .. } = prev {
        debug!(%url, "websocket disconnected");
        let _ = sink.close().await;
    }

    shared.table.lock().await.fail_all();
}

/// Installs a freshly opened socket as the live connection and spawns its
/// reader task. Declines when the session was torn down mid-handshake.
async fn install(shared: &Arc<Shared>, url: String, ws: WsStream) -> bool {
    if shared.desired_url.lock().await.as_deref() != Some(url.as_str()) {
        return false;
    }

    let seq = shared.conn_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let (sink, source) = ws.split();
    let prev = std::mem::replace(
        &mut *shared.state.lock().await,
        ConnState::Connected {
            url: url.clone(),
            seq,
            sink,
        },
    );
    // A connection being replaced is closed and discarded.
    drop(prev);
    shared.connected.store(true, Ordering::SeqCst);
    debug!(%url, seq, "websocket connection established");

    let task_shared = Arc::clone(shared);
    tokio::spawn(async move {
        read_loop(task_shared, url, seq, source).await;
    });
    true
}

/// Drains the socket stream, dispatching frames until it ends or errors.
async fn read_loop(shared: Arc<Shared>, url: String, seq: u64, mut source: WsSource) {
    while let Some(next) = source.next().await {
        match next {
            Ok(Message::Text(text)) => dispatch_frame(&shared, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            // Ping/pong are handled by the transport; binary frames are
            // not protocol messages.
            Ok(_) => {}
            Err(err) => {
                warn!(%url, error = %err, "websocket error");
                break;
            }
        }
    }
    handle_closure(shared, url, seq).await;
}

/// Decodes and routes one inbound frame. Protocol violations affect only
/// the offending frame: there is no caller to surface them to.
async fn dispatch_frame(shared: &Arc<Shared>, text: &str) {
    let envelope = match codec::decode_envelope(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "dropping malformed frame");
            return;
        }
    };

    let outcome = match shared.table.lock().await.dispatch(envelope) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("dropping frame: {err}");
            return;
        }
    };

    if outcome.finalized {
        schedule_finalize(shared, outcome.call_id);
    }
}

/// Removes a closed record after the grace period. A `None` grace period
/// disables pruning entirely.
fn schedule_finalize(shared: &Arc<Shared>, call_id: u64) {
    let Some(delay) = shared.finalize_after else {
        return;
    };
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        shared.table.lock().await.remove(call_id);
    });
}

/// Handles the end of a connection's stream. In-flight records are
/// failed, and if the desired URL is unchanged a retry loop starts.
async fn handle_closure(shared: Arc<Shared>, url: String, seq: u64) {
    {
        let mut state = shared.state.lock().await;
        match &*state {
            ConnState::Connected { seq: live, .. } if *live == seq => {
                *state = ConnState::Disconnected;
            }
            // A replacement connection owns the state now.
            _ => return,
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    debug!(%url, "websocket closed");

    // Records are scoped to the connection that carried them.
    shared.table.lock().await.fail_all();

    if shared.desired_url.lock().await.as_deref() == Some(url.as_str()) {
        *shared.state.lock().await = ConnState::AwaitingRetry;
        spawn_retry(&shared, url);
    }
}

/// Retry loop: sleep, re-check that the desired URL is unchanged, attempt
/// the handshake; log failures and repeat. Cancelled by teardown.
fn spawn_retry(shared: &Arc<Shared>, url: String) {
    let task_shared = Arc::clone(shared);
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(task_shared.reconnect_delay).await;
            if task_shared.desired_url.lock().await.as_deref() != Some(url.as_str()) {
                return;
            }
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    install(&task_shared, url.clone(), ws).await;
                    return;
                }
                Err(err) => {
                    warn!(%url, error = %err, "failed to reconnect to websocket");
                }
            }
        }
    });

    if let Ok(mut retry) = shared.retry.lock() {
        if let Some(prev) = retry.replace(handle) {
            prev.abort();
        }
    }
}
