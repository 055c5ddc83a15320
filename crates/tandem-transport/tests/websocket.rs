//! End-to-end tests against a local axum WebSocket server.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_transport::{
    Event, EventKind, Listener, Payload, ReadyState, ReconnectConfig, ReconnectingSocket,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((document, token)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.protocols(["tandem"])
        .on_upgrade(move |socket| echo(socket, document, token))
}

async fn echo(mut socket: WebSocket, document: String, token: String) {
    let greeting = format!("hello {} {}", document, token);
    if socket.send(Message::Text(greeting)).await.is_err() {
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) if text == "drop" => return,
            Message::Text(text) => {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Binary(data) => {
                if socket.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn start_server() -> SocketAddr {
    let app = Router::new().route("/ws/:document/:token", get(ws_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config() -> ReconnectConfig {
    ReconnectConfig::default()
        .with_min_reconnection_delay(Duration::from_millis(50))
        .with_max_reconnection_delay(Duration::from_millis(200))
}

fn messages(socket: &ReconnectingSocket) -> mpsc::UnboundedReceiver<Payload> {
    let (tx, rx) = mpsc::unbounded_channel();
    socket.add_event_listener(
        EventKind::Message,
        Listener::callback(move |event| {
            if let Event::Message(payload) = event {
                let _ = tx.send(payload.clone());
            }
        }),
    );
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Payload {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("listener dropped")
}

#[tokio::test]
async fn test_echo_over_websocket() {
    let addr = start_server().await;
    let url = format!("ws://{}/ws/doc-1/secret", addr);

    let socket = ReconnectingSocket::connect(url.as_str(), vec!["tandem".into()], config()).unwrap();
    let mut rx = messages(&socket);

    // Queued before the connection opens.
    socket.send("first");

    assert_eq!(next(&mut rx).await, Payload::from("hello doc-1 secret"));
    assert_eq!(next(&mut rx).await, Payload::from("first"));
    assert_eq!(socket.ready_state(), ReadyState::Open);
    assert_eq!(socket.url(), url);

    socket.send(vec![1u8, 2, 3]);
    assert_eq!(next(&mut rx).await, Payload::from(vec![1u8, 2, 3]));

    socket.close(1000, "done");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(socket.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let addr = start_server().await;
    let url = format!("ws://{}/ws/doc-2/token", addr);

    let socket = ReconnectingSocket::connect(url, vec!["tandem".into()], config()).unwrap();
    let opens = Arc::new(AtomicUsize::new(0));
    let o = opens.clone();
    socket.add_event_listener(
        EventKind::Open,
        Listener::callback(move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let mut rx = messages(&socket);

    assert_eq!(next(&mut rx).await, Payload::from("hello doc-2 token"));
    socket.send("drop");

    assert_eq!(next(&mut rx).await, Payload::from("hello doc-2 token"));
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    socket.close(1000, "");
}
