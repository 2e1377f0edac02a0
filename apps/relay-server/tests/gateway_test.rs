mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_server::gateway::events::{ChatMessage, CONNECTED, UPDATE_GROUPS};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open(addr: SocketAddr) -> Ws {
    let url = format!("ws://{addr}/chat");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws_stream
}

async fn send(ws: &mut Ws, message: &ChatMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(tungstenite::Message::Text(json.into()))
        .await
        .expect("send frame");
}

/// Next chat message, skipping server heartbeats. Panics on close or timeout.
async fn next_chat(ws: &mut Ws) -> ChatMessage {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws read error");

        let text = match msg {
            tungstenite::Message::Text(text) => text,
            tungstenite::Message::Close(frame) => panic!("connection closed: {frame:?}"),
            _ => continue,
        };
        let message: ChatMessage = serde_json::from_str(text.as_str()).expect("parse frame");
        if !message.is_heartbeat() {
            return message;
        }
    }
}

/// Connect and identify as `username`, consuming the acknowledgement.
async fn connect_as(addr: SocketAddr, username: &str) -> Ws {
    let mut ws = open(addr).await;
    send(&mut ws, &ChatMessage::heartbeat(username)).await;
    assert_eq!(next_chat(&mut ws).await.content, CONNECTED);
    assert_eq!(next_chat(&mut ws).await.content, UPDATE_GROUPS);
    ws
}

/// Poll until `check` holds or a second passes.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_message_gets_connect_ack_and_group_refresh() {
    let (addr, state, _store) = common::start_server(common::test_config()).await;
    let mut ws = open(addr).await;

    send(&mut ws, &ChatMessage::heartbeat("alice")).await;

    let ack = next_chat(&mut ws).await;
    assert_eq!(ack.sender, "System");
    assert_eq!(ack.content, CONNECTED);
    assert_eq!(next_chat(&mut ws).await.content, UPDATE_GROUPS);
    assert!(state.sessions.is_online("alice"));
}

#[tokio::test]
async fn group_message_is_pushed_without_recipient_polling() {
    let (addr, state, store) = common::start_server(common::test_config()).await;
    common::seed_user(&state, "alice").await;
    common::seed_user(&state, "bob").await;
    let group = common::seed_group(&state, "alice", "g1").await;
    common::seed_member(&state, "bob", group).await;

    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    send(&mut alice, &ChatMessage::group("alice", group.to_string(), "hi")).await;

    // Bob never sends anything; the mailbox wake-up delivers it.
    let received = next_chat(&mut bob).await;
    assert_eq!(received.sender, "alice");
    assert_eq!(received.content, "hi");
    assert_eq!(received.group_id, group.to_string());
    assert!(received.timestamp.is_some());
    assert_eq!(store.message_count(), 1);
}

#[tokio::test]
async fn idle_connection_receives_server_heartbeat() {
    let (addr, _state, _store) = common::start_server(common::test_config()).await;
    let mut ws = connect_as(addr, "alice").await;

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for heartbeat")
        .expect("stream ended")
        .expect("ws read error");
    let text = msg.into_text().expect("not text");
    let heartbeat: ChatMessage = serde_json::from_str(text.as_str()).unwrap();
    assert!(heartbeat.is_heartbeat());
    assert!(heartbeat.is_from_system());
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let (addr, _state, _store) = common::start_server(common::test_config()).await;
    let mut ws = open(addr).await;

    ws.send(tungstenite::Message::Text("not json".into()))
        .await
        .unwrap();
    ws.send(tungstenite::Message::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();
    send(&mut ws, &ChatMessage::heartbeat("alice")).await;

    assert_eq!(next_chat(&mut ws).await.content, CONNECTED);
}

#[tokio::test]
async fn closing_the_socket_unregisters_the_user() {
    let (addr, state, _store) = common::start_server(common::test_config()).await;
    let mut ws = connect_as(addr, "alice").await;
    assert!(state.sessions.is_online("alice"));

    ws.close(None).await.unwrap();

    assert!(eventually(|| !state.sessions.is_online("alice")).await);
}

#[tokio::test]
async fn second_connection_replaces_the_first() {
    let (addr, state, _store) = common::start_server(common::test_config()).await;
    let mut first = connect_as(addr, "alice").await;
    let _second = connect_as(addr, "alice").await;

    let closed = time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = first.next().await {
            match msg {
                Ok(tungstenite::Message::Close(_)) | Err(_) => return true,
                _ => continue,
            }
        }
        true
    })
    .await
    .expect("stale connection was not closed");

    assert!(closed);
    assert!(state.sessions.is_online("alice"));
    assert_eq!(state.sessions.len(), 1);
}

#[tokio::test]
async fn silent_client_is_closed_after_idle_timeout() {
    let config = relay_server::config::Config {
        idle_timeout: Duration::from_millis(500),
        ..common::test_config()
    };
    let (addr, state, _store) = common::start_server(config).await;
    let mut ws = connect_as(addr, "alice").await;

    let closed = time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            if matches!(msg, Ok(tungstenite::Message::Close(_)) | Err(_)) {
                break;
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "idle connection stayed open");
    assert!(eventually(|| !state.sessions.is_online("alice")).await);
}

#[tokio::test]
async fn announcement_reaches_connected_sockets() {
    let (addr, state, _store) = common::start_server(common::test_config()).await;
    let mut alice = connect_as(addr, "alice").await;
    let mut bob = connect_as(addr, "bob").await;

    assert_eq!(state.authority.announce("maintenance at noon"), 2);

    for ws in [&mut alice, &mut bob] {
        let msg = next_chat(ws).await;
        assert_eq!(msg.sender, "System");
        assert_eq!(msg.content, "maintenance at noon");
    }
}

#[tokio::test]
async fn zero_outbound_heartbeat_still_serves_connections() {
    let config = relay_server::config::Config {
        outbound_heartbeat: Duration::ZERO,
        ..common::test_config()
    };
    let (addr, state, _store) = common::start_server(config).await;
    let mut alice = connect_as(addr, "alice").await;

    assert!(state.sessions.is_online("alice"));
    assert_eq!(state.authority.announce("still here"), 1);
    assert_eq!(next_chat(&mut alice).await.content, "still here");
}
