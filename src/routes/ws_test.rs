use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::state::AppState;
use crate::state::test_helpers::test_app_state;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// helpers
// =============================================================================

async fn spawn_server() -> (SocketAddr, AppState) {
    let state = test_app_state();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = crate::routes::app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Connect and consume the welcome message.
async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    let welcome = recv(&mut client).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["connectionId"].is_string());
    client
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("message receive timed out")
            .expect("stream ended")
            .expect("websocket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let res = timeout(Duration::from_millis(100), client.next()).await;
    assert!(res.is_err(), "expected no message, got {res:?}");
}

/// Join `room_id` and return the `canvas-state` reply.
async fn join(client: &mut Client, room_id: &str, user_id: &str) -> Value {
    send(
        client,
        json!({"type": "join-room", "roomId": room_id, "userId": user_id, "userName": user_id, "color": "#123456"}),
    )
    .await;
    let reply = recv(client).await;
    assert_eq!(reply["type"], "canvas-state");
    reply
}

async fn wait_for_room_count(state: &AppState, expected: usize) {
    for _ in 0..50 {
        if state.rooms.read().await.room_count() == expected {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("room count never reached {expected}");
}

// =============================================================================
// tests
// =============================================================================

#[tokio::test]
async fn join_returns_empty_snapshot() {
    let (addr, state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;

    let reply = join(&mut a, "r1", "a").await;

    assert_eq!(reply["operations"], json!([]));
    assert_eq!(state.rooms.read().await.count_of("r1"), 1);
}

#[tokio::test]
async fn root_path_also_upgrades() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/").await;
    join(&mut a, "r1", "a").await;
}

#[tokio::test]
async fn strokes_reach_peers_and_undo_reaches_everyone() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;
    let mut b = connect(addr, "/ws").await;
    join(&mut a, "r1", "a").await;
    join(&mut b, "r1", "b").await;

    let joined = recv(&mut a).await;
    assert_eq!(joined["type"], "user-joined");
    assert_eq!(joined["user"]["id"], "b");

    send(&mut a, json!({"type": "draw-start", "operationId": "a1", "x": 10, "y": 20, "color": "#000", "brushSize": 3})).await;
    let stroke = recv(&mut b).await;
    assert_eq!(stroke["type"], "draw-start");
    assert_eq!(stroke["operationId"], "a1");
    assert_eq!(stroke["userId"], "a");
    assert_eq!(stroke["x"], 10.0);
    assert_silent(&mut a).await;

    send(&mut a, json!({"type": "undo"})).await;
    for client in [&mut a, &mut b] {
        let undo = recv(client).await;
        assert_eq!(undo["type"], "operation-undo");
        assert_eq!(undo["operationId"], "a1");
    }
}

#[tokio::test]
async fn late_joiner_sees_existing_strokes() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;
    join(&mut a, "r1", "a").await;
    send(&mut a, json!({"type": "draw-start", "operationId": "a1", "x": 1, "y": 1})).await;
    send(&mut a, json!({"type": "draw-end", "operationId": "a2"})).await;
    send(&mut a, json!({"type": "debug-state"})).await;
    let debug = recv(&mut a).await;
    assert_eq!(debug["operationCount"], 2);

    let mut b = connect(addr, "/ws").await;
    let snapshot = join(&mut b, "r1", "b").await;

    let ids: Vec<&str> = snapshot["operations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["operationId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a1", "a2"]);
}

#[tokio::test]
async fn unknown_type_and_invalid_json_get_error_replies() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;

    send(&mut a, json!({"type": "teleport"})).await;
    let err = recv(&mut a).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "E_UNKNOWN_MESSAGE_TYPE");

    a.send(WsMessage::Text("{not json".into())).await.unwrap();
    let err = recv(&mut a).await;
    assert_eq!(err["code"], "E_MALFORMED_MESSAGE");

    // Connection survives bad input.
    join(&mut a, "r1", "a").await;
}

#[tokio::test]
async fn undo_before_join_fails_with_reason() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;

    send(&mut a, json!({"type": "undo"})).await;
    let reply = recv(&mut a).await;

    assert_eq!(reply, json!({"type": "operation-failed", "action": "undo", "reason": "not_joined"}));
}

#[tokio::test]
async fn disconnect_notifies_peers_and_last_one_destroys_room() {
    let (addr, state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;
    let mut b = connect(addr, "/ws").await;
    join(&mut a, "r1", "a").await;
    join(&mut b, "r1", "b").await;
    recv(&mut a).await; // user-joined

    a.close(None).await.unwrap();
    let left = recv(&mut b).await;
    assert_eq!(left["type"], "user-left");
    assert_eq!(left["userId"], "a");
    assert_eq!(state.rooms.read().await.count_of("r1"), 1);

    drop(b);
    wait_for_room_count(&state, 0).await;
}

#[tokio::test]
async fn binary_text_frames_are_accepted() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;

    let payload = json!({"type": "join-room", "roomId": "r1", "userId": "a", "userName": "A", "color": "#fff"});
    a.send(WsMessage::Binary(payload.to_string().into_bytes().into()))
        .await
        .unwrap();

    assert_eq!(recv(&mut a).await["type"], "canvas-state");
}

#[tokio::test]
async fn own_broadcast_arrives_before_a_later_reply() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;

    for trial in 0..20 {
        join(&mut a, &format!("room-{trial}"), "a").await;
        send(&mut a, json!({"type": "draw-start", "operationId": format!("op-{trial}"), "x": 1, "y": 1})).await;

        let undo = WsMessage::Text(json!({"type": "undo"}).to_string().into());
        a.feed(undo.clone()).await.unwrap();
        a.feed(undo).await.unwrap();
        a.flush().await.unwrap();

        let first = recv(&mut a).await;
        assert_eq!(first["type"], "operation-undo", "trial {trial}: {first}");
        assert_eq!(first["operationId"], format!("op-{trial}"));
        let second = recv(&mut a).await;
        assert_eq!(second["type"], "operation-failed", "trial {trial}: {second}");
        assert_eq!(second["reason"], "no_operations");
    }
}

#[tokio::test]
async fn old_room_strokes_never_follow_the_new_snapshot() {
    let (addr, _state) = spawn_server().await;
    let mut a = connect(addr, "/ws").await;
    let mut b = connect(addr, "/ws").await;
    join(&mut a, "r1", "a").await;
    join(&mut b, "r1", "b").await;
    recv(&mut a).await; // user-joined

    for i in 0..10 {
        let stroke = json!({"type": "draw-move", "operationId": format!("b{i}"), "x": i, "y": i});
        b.feed(WsMessage::Text(stroke.to_string().into())).await.unwrap();
    }
    b.flush().await.unwrap();
    send(&mut a, json!({"type": "join-room", "roomId": "r2", "userId": "a", "userName": "a", "color": "#123456"})).await;

    loop {
        let msg = recv(&mut a).await;
        if msg["type"] == "canvas-state" {
            assert_eq!(msg["operations"], json!([]));
            break;
        }
        assert_eq!(msg["type"], "draw-move", "unexpected before snapshot: {msg}");
    }
    assert_silent(&mut a).await;
}
