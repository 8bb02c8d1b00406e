//! End-to-end tests over real WebSockets.
//!
//! Each test boots a server on an ephemeral port and drives it with
//! plain tokio-tungstenite clients speaking the JSON wire protocol, the
//! way a browser client would.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use connect4::network::server::{GameServer, ServerConfig};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GameServer::new(config);
    tokio::spawn(server.run_on(listener));
    addr
}

async fn start_default_server() -> SocketAddr {
    start_server(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    })
    .await
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    ws
}

async fn send(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next JSON frame, skipping protocol-level ping/pong traffic.
async fn recv_frame(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Next frame of the given type; frames of other types are skipped.
/// Queue updates in particular arrive on their own throttle schedule.
async fn recv_type(ws: &mut WsClient, msg_type: &str) -> Value {
    for _ in 0..16 {
        let frame = recv_frame(ws).await;
        if frame["type"] == msg_type {
            return frame["data"].clone();
        }
    }
    panic!("no {msg_type} frame within 16 frames");
}

/// Assert that no frame of the given type shows up within `window`.
async fn assert_silent(ws: &mut WsClient, window: Duration) {
    match timeout(window, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("expected silence, got {other:?}"),
    }
}

async fn login(ws: &mut WsClient, username: &str) -> String {
    send(ws, json!({"type": "login", "data": {"username": username}})).await;
    let welcome = recv_type(ws, "welcome").await;
    assert_eq!(welcome["username"], username);
    welcome["player_id"].as_str().unwrap().to_string()
}

/// Create a game with `host`, join it with `guest`; returns the code and
/// the starting seat.
async fn start_game(host: &mut WsClient, guest: &mut WsClient) -> (String, usize) {
    send(host, json!({"type": "create_game", "data": {}})).await;
    let created = recv_type(host, "game_created").await;
    let code = created["code"].as_str().unwrap().to_string();
    let state = recv_type(host, "game_state").await;
    assert_eq!(state["status"], 0);

    send(guest, json!({"type": "join_game", "data": {"code": code.clone()}})).await;
    let start_host = recv_type(host, "game_start").await;
    let start_guest = recv_type(guest, "game_start").await;
    assert_eq!(start_host, start_guest);
    assert_eq!(start_host["time_remaining"], json!([150_000, 150_000]));

    (code, start_host["current_turn"].as_u64().unwrap() as usize)
}

#[tokio::test]
async fn happy_two_player_game() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    login(&mut c1, "Ann").await;
    login(&mut c2, "Bob").await;

    let (_code, first_turn) = start_game(&mut c1, &mut c2).await;

    // Seat 0 is Ann (host), seat 1 is Bob.
    let (mut mover, mut other, mover_idx) = if first_turn == 0 {
        (c1, c2, 0)
    } else {
        (c2, c1, 1)
    };

    // The starting player stacks column 0; the opponent answers in
    // column 1. The fourth column-0 token wins vertically.
    for round in 0..4 {
        send(&mut mover, json!({"type": "play", "data": {"column": 0}})).await;
        let move_a = recv_type(&mut mover, "move").await;
        let move_b = recv_type(&mut other, "move").await;
        assert_eq!(move_a, move_b);
        assert_eq!(move_a["player_idx"].as_u64().unwrap() as usize, mover_idx);
        assert_eq!(move_a["column"], 0);
        assert_eq!(move_a["row"].as_u64().unwrap() as usize, 5 - round);

        if round == 3 {
            break;
        }

        send(&mut other, json!({"type": "play", "data": {"column": 1}})).await;
        recv_type(&mut mover, "move").await;
        recv_type(&mut other, "move").await;
    }

    let over_a = recv_type(&mut mover, "game_over").await;
    let over_b = recv_type(&mut other, "game_over").await;
    assert_eq!(over_a, over_b);
    assert_eq!(over_a["result"].as_u64().unwrap() as usize, mover_idx + 1);
    // Column 0 belongs to the winner from the bottom up.
    assert_eq!(
        over_a["board"][5][0].as_u64().unwrap() as usize,
        mover_idx + 1
    );
}

#[tokio::test]
async fn out_of_turn_error_stays_local() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    login(&mut c1, "Ann").await;
    login(&mut c2, "Bob").await;
    let (_code, first_turn) = start_game(&mut c1, &mut c2).await;

    let (mut waiter, mut mover) = if first_turn == 0 { (c2, c1) } else { (c1, c2) };

    send(&mut waiter, json!({"type": "play", "data": {"column": 0}})).await;
    let error = recv_type(&mut waiter, "error").await;
    assert_eq!(error["message"], "not your turn");

    // The player to move sees nothing of the rejected attempt.
    assert_silent(&mut mover, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn join_code_is_normalized() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    login(&mut c1, "Ann").await;

    // " abcdef" truncates to " abcd", uppercases to " ABCD": no game.
    send(&mut c1, json!({"type": "join_game", "data": {"code": " abcdef"}})).await;
    let error = recv_type(&mut c1, "error").await;
    assert_eq!(error["message"], "game not found");
}

#[tokio::test]
async fn lowercase_code_joins_game() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    login(&mut c1, "Ann").await;
    login(&mut c2, "Bob").await;

    send(&mut c1, json!({"type": "create_game", "data": {}})).await;
    let created = recv_type(&mut c1, "game_created").await;
    let code = created["code"].as_str().unwrap().to_lowercase();
    recv_type(&mut c1, "game_state").await;

    send(&mut c2, json!({"type": "join_game", "data": {"code": code}})).await;
    recv_type(&mut c2, "game_start").await;
    recv_type(&mut c1, "game_start").await;
}

#[tokio::test]
async fn reconnect_into_playing_game_gets_snapshot() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    let ann_id = login(&mut c1, "Ann").await;
    login(&mut c2, "Bob").await;
    let (code, first_turn) = start_game(&mut c1, &mut c2).await;

    // One move lands so the snapshot has content.
    let mover = if first_turn == 0 { &mut c1 } else { &mut c2 };
    send(mover, json!({"type": "play", "data": {"column": 3}})).await;
    recv_type(&mut c1, "move").await;
    recv_type(&mut c2, "move").await;

    // Ann's connection drops and she comes back with her token.
    c1.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut c1b = connect(addr).await;
    send(
        &mut c1b,
        json!({"type": "login", "data": {"username": "Ann", "player_id": ann_id.clone()}}),
    )
    .await;

    let welcome = recv_type(&mut c1b, "welcome").await;
    assert_eq!(welcome["player_id"], ann_id.as_str());

    let state = recv_type(&mut c1b, "game_state").await;
    assert_eq!(state["code"], code.as_str());
    assert_eq!(state["status"], 1);
    assert_eq!(state["player_idx"], 0);
    assert_eq!(state["move_count"], 1);
    assert_eq!(state["last_move"], json!({"col": 3, "row": 5}));
    assert_eq!(
        state["board"][5][3].as_u64().unwrap() as usize,
        first_turn + 1
    );
}

#[tokio::test]
async fn clock_expiry_ends_the_game() {
    let addr = start_server(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        initial_clock: Duration::from_millis(400),
        ..Default::default()
    })
    .await;

    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;
    login(&mut c1, "Ann").await;
    login(&mut c2, "Bob").await;

    send(&mut c1, json!({"type": "create_game", "data": {}})).await;
    let created = recv_type(&mut c1, "game_created").await;
    recv_type(&mut c1, "game_state").await;
    send(
        &mut c2,
        json!({"type": "join_game", "data": {"code": created["code"].clone()}}),
    )
    .await;
    let start = recv_type(&mut c1, "game_start").await;
    recv_type(&mut c2, "game_start").await;
    let on_move = start["current_turn"].as_u64().unwrap() as usize;

    // Nobody moves: the player to move flags.
    let over_a = recv_type(&mut c1, "game_over").await;
    let over_b = recv_type(&mut c2, "game_over").await;
    assert_eq!(over_a, over_b);
    assert_eq!(over_a["result"].as_u64().unwrap() as usize, (1 - on_move) + 1);

    // The game is decided; a late move bounces.
    send(&mut c1, json!({"type": "play", "data": {"column": 0}})).await;
    let error = recv_type(&mut c1, "error").await;
    assert_eq!(error["message"], "game is not in playing state");
}

#[tokio::test]
async fn matchmaking_pairs_two_players() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;
    login(&mut c1, "Ann").await;
    login(&mut c2, "Bob").await;

    send(&mut c1, json!({"type": "join_matchmaking", "data": {}})).await;
    let frame = recv_frame(&mut c1).await;
    assert_eq!(frame["type"], "matchmaking_searching");

    send(&mut c2, json!({"type": "join_matchmaking", "data": {}})).await;
    let frame = recv_frame(&mut c2).await;
    assert_eq!(frame["type"], "matchmaking_searching");

    let start_a = recv_type(&mut c1, "game_start").await;
    let start_b = recv_type(&mut c2, "game_start").await;
    assert_eq!(start_a, start_b);
    assert_eq!(start_a["code"].as_str().unwrap().len(), 5);
    assert_eq!(start_a["players"][0]["username"], "Ann");
    assert_eq!(start_a["players"][1]["username"], "Bob");

    // The coalesced queue update reports the drained queue.
    let update = recv_type(&mut c1, "queue_update").await;
    assert_eq!(update["players_in_queue"], 0);
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_dropped() {
    let addr = start_default_server().await;
    let mut c1 = connect(addr).await;
    login(&mut c1, "Ann").await;

    send(&mut c1, json!({"type": "dance", "data": {}})).await;
    send(&mut c1, json!({"type": "play", "data": {"column": "three"}})).await;
    assert_silent(&mut c1, Duration::from_millis(300)).await;

    // The connection is still healthy afterwards.
    send(&mut c1, json!({"type": "create_game", "data": {}})).await;
    recv_type(&mut c1, "game_created").await;
}

#[tokio::test]
async fn non_ws_path_is_rejected() {
    let addr = start_default_server().await;
    let result = connect_async(format!("ws://{addr}/other")).await;
    assert!(result.is_err());
}
