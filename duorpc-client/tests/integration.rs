//! End-to-end tests against a loopback mock service exposing the HTTP
//! RPC route and the WebSocket upgrade on one listener.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use duorpc_client::{Client, ClientConfig, ClientError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> Client {
    Client::new(ClientConfig::new(addr.to_string()))
}

async fn recv_call(socket: &mut WebSocket) -> Option<Value> {
    loop {
        match socket.recv().await? {
            Ok(WsMessage::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: Value) {
    socket
        .send(WsMessage::Text(frame.to_string().into()))
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Single-shot transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_shot_resolves_response_and_skips_table() {
    init_tracing();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let app = Router::new().route(
        "/rpc",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                tx.send(body).unwrap();
                Json(json!({"response": {"ok": true}}))
            }
        }),
    );
    let addr = serve(app).await;
    let client = client_for(addr);

    let reply = client.send_rpc("ping", json!({"x": 1})).await.unwrap();
    assert_eq!(reply, json!({"ok": true}));

    // Exactly one POST, carrying the full wire message.
    let body = rx.recv().await.unwrap();
    assert_eq!(body, json!({"id": 0, "rpc": "ping", "request": {"x": 1}}));
    assert!(rx.try_recv().is_err());

    // The correlation table was never touched.
    assert_eq!(client.pending_calls().await, 0);
}

#[tokio::test]
async fn single_shot_identities_strictly_increase() {
    init_tracing();
    let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
    let app = Router::new().route(
        "/rpc",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                tx.send(body["id"].as_u64().unwrap()).unwrap();
                Json(json!({"response": null}))
            }
        }),
    );
    let addr = serve(app).await;
    let client = client_for(addr);

    for _ in 0..3 {
        client.send_rpc("ping", Value::Null).await.unwrap();
    }

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(rx.recv().await.unwrap());
    }
    assert_eq!(ids, vec![0, 1, 2]);
}

#[tokio::test]
async fn single_shot_non_200_surfaces_server_message() {
    init_tracing();
    let app = Router::new().route(
        "/rpc",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "boom"})),
            )
        }),
    );
    let addr = serve(app).await;
    let client = client_for(addr);

    let err = client.send_rpc("explode", Value::Null).await.unwrap_err();
    match err {
        ClientError::Server { message } => assert_eq!(message, "boom"),
        other => panic!("expected server error, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Socket transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn socket_chain_follow_ups_resolve_in_order() {
    init_tracing();
    let app = Router::new().route(
        "/rpc",
        get(|ws: WebSocketUpgrade| async move {
            ws.on_upgrade(|mut socket| async move {
                let Some(call) = recv_call(&mut socket).await else {
                    return;
                };
                let id = call["id"].as_u64().unwrap();
                // First reply re-keys the chain to 7, then a follow-up
                // arrives under that identity.
                send_frame(&mut socket, json!({"id": id, "response": {"id": 7, "chunk": 1}}))
                    .await;
                send_frame(&mut socket, json!({"id": 7, "response": {"chunk": 2}})).await;
                tokio::time::sleep(Duration::from_millis(500)).await;
            })
        }),
    );
    let addr = serve(app).await;
    let client = client_for(addr);

    client.connect_ws().await.unwrap();
    assert!(client.is_connected());

    let mut chain = client.send_rpc_chain("stream", json!({})).await.unwrap();
    assert_eq!(chain.id(), 0);

    let first = chain.next().await.unwrap();
    assert_eq!(first.payload["chunk"], json!(1));
    assert_eq!(first.payload["id"], json!(7));
    assert_eq!(first.origin.rpc, "stream");
    assert_eq!(first.origin.id, 0);

    let second = chain.next().await.unwrap();
    assert_eq!(second.payload["chunk"], json!(2));
    assert_eq!(second.origin.id, 0);

    // The chain is still open: one record, no new calls were created.
    assert_eq!(client.pending_calls().await, 1);

    client.disconnect_ws().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn socket_terminal_reply_prunes_after_grace() {
    init_tracing();
    let app = Router::new().route(
        "/rpc",
        get(|ws: WebSocketUpgrade| async move {
            ws.on_upgrade(|mut socket| async move {
                while let Some(call) = recv_call(&mut socket).await {
                    let id = call["id"].as_u64().unwrap();
                    send_frame(&mut socket, json!({"id": id, "response": {"done": true}})).await;
                }
            })
        }),
    );
    let addr = serve(app).await;
    let client = Client::new(
        ClientConfig::new(addr.to_string())
            .with_finalize_after(Some(Duration::from_millis(100))),
    );

    client.connect_ws().await.unwrap();
    let reply = client.send_rpc("once", Value::Null).await.unwrap();
    assert_eq!(reply, json!({"done": true}));

    // Resolved but still within the grace period.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(client.pending_calls().await, 1);

    // Past the grace period the record is gone.
    tokio::time::sleep(Duration::from_millis(220)).await;
    assert_eq!(client.pending_calls().await, 0);

    client.disconnect_ws().await;
}

#[tokio::test]
async fn socket_records_survive_when_pruning_disabled() {
    init_tracing();
    let app = Router::new().route(
        "/rpc",
        get(|ws: WebSocketUpgrade| async move {
            ws.on_upgrade(|mut socket| async move {
                while let Some(call) = recv_call(&mut socket).await {
                    let id = call["id"].as_u64().unwrap();
                    send_frame(&mut socket, json!({"id": id, "response": {"done": true}})).await;
                }
            })
        }),
    );
    let addr = serve(app).await;
    let client = Client::new(ClientConfig::new(addr.to_string()).with_finalize_after(None));

    client.connect_ws().await.unwrap();
    client.send_rpc("once", Value::Null).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.pending_calls().await, 1);

    client.disconnect_ws().await;
}

#[tokio::test]
async fn in_flight_call_fails_on_unexpected_closure() {
    init_tracing();
    let app = Router::new().route(
        "/rpc",
        get(|ws: WebSocketUpgrade| async move {
            ws.on_upgrade(|mut socket| async move {
                // Swallow the call, then drop the connection without
                // ever answering.
                let _ = recv_call(&mut socket).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
        }),
    );
    let addr = serve(app).await;
    let client = Client::new(
        ClientConfig::new(addr.to_string()).with_reconnect_delay(Duration::from_secs(5)),
    );

    client.connect_ws().await.unwrap();
    let err = client.send_rpc("hang", Value::Null).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
    assert_eq!(client.pending_calls().await, 0);

    client.disconnect_ws().await;
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_suppresses_scheduled_reconnect() {
    init_tracing();
    let conns = Arc::new(AtomicUsize::new(0));
    let counter = conns.clone();
    let app = Router::new().route(
        "/rpc",
        get(move |ws: WebSocketUpgrade| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Drop every connection as soon as it opens.
                ws.on_upgrade(|_socket| async {})
            }
        }),
    );
    let addr = serve(app).await;
    let client = Client::new(
        ClientConfig::new(addr.to_string()).with_reconnect_delay(Duration::from_millis(50)),
    );

    client.connect_ws().await.unwrap();
    assert_eq!(conns.load(Ordering::SeqCst), 1);

    // Let the closure land, then disconnect before the retry timer fires.
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.disconnect_ws().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conns.load(Ordering::SeqCst), 1);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn unexpected_closure_reconnects_after_delay() {
    init_tracing();
    let conns = Arc::new(AtomicUsize::new(0));
    let counter = conns.clone();
    let app = Router::new().route(
        "/rpc",
        get(move |ws: WebSocketUpgrade| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                ws.on_upgrade(move |mut socket| async move {
                    if n == 0 {
                        // First connection drops immediately.
                        return;
                    }
                    // Later connections stay up.
                    while let Some(Ok(_)) = socket.recv().await {}
                })
            }
        }),
    );
    let addr = serve(app).await;
    let client = Client::new(
        ClientConfig::new(addr.to_string()).with_reconnect_delay(Duration::from_millis(50)),
    );

    client.connect_ws().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(conns.load(Ordering::SeqCst) >= 2);
    assert!(client.is_connected());

    client.disconnect_ws().await;
}
