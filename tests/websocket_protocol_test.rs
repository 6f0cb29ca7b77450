mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use serial_test::serial;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use aiagent_console::http;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server(state: aiagent_console::AppState) -> String {
    let app = http::router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn create_agent(state: &aiagent_console::AppState, source_repo: &std::path::Path) -> String {
    let app = http::router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"name": "demo", "sourceRepo": source_repo.to_string_lossy()}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let agent: Value = serde_json::from_slice(&bytes).unwrap();
    agent["id"].as_str().unwrap().to_string()
}

async fn recv_json(socket: &mut WsStream) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a server frame")
            .expect("socket closed")
            .unwrap()
        {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

/// End-to-end scenarios 1-3 (§8): a first subscriber attaches and gets PTY
/// output, a second subscriber replays from `fromSeq`, and `gain-control`
/// preempts the first subscriber's write access.
#[tokio::test]
#[serial]
async fn attach_replay_and_gain_control() {
    let data_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    common::init_git_repo(repo_dir.path());
    let state = common::test_state(data_dir.path());
    let agent_id = create_agent(&state, repo_dir.path()).await;
    let ws_url = spawn_server(state).await;

    let (mut s1, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    s1.send(WsMessage::Text(json!({"type": "attach", "agentId": agent_id}).to_string()))
        .await
        .unwrap();

    let attached = recv_json(&mut s1).await;
    assert_eq!(attached["type"], "attached");
    assert_eq!(attached["hasControl"], json!(true));
    let tab_id = attached["tabId"].as_str().unwrap().to_string();

    let sync = recv_json(&mut s1).await;
    assert_eq!(sync["type"], "output-sync");
    assert_eq!(sync["chunks"], json!([]));

    s1.send(WsMessage::Text(json!({"type": "input", "data": "echo hi\n"}).to_string()))
        .await
        .unwrap();

    let output = loop {
        let msg = recv_json(&mut s1).await;
        if msg["type"] == "output" {
            break msg;
        }
    };
    assert!(output["data"].as_str().unwrap().contains("hi"));

    let (mut s2, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    s2.send(
        WsMessage::Text(json!({"type": "attach", "agentId": agent_id, "tabId": tab_id, "fromSeq": 0}).to_string()),
    )
    .await
    .unwrap();
    let attached2 = recv_json(&mut s2).await;
    assert_eq!(attached2["hasControl"], json!(false));
    let sync2 = recv_json(&mut s2).await;
    assert_eq!(sync2["type"], "output-sync");
    assert!(!sync2["chunks"].as_array().unwrap().is_empty());

    s2.send(WsMessage::Text(json!({"type": "gain-control"}).to_string())).await.unwrap();
    let changed2 = loop {
        let msg = recv_json(&mut s2).await;
        if msg["type"] == "control-changed" {
            break msg;
        }
    };
    assert_eq!(changed2["hasControl"], json!(true));

    let changed1 = loop {
        let msg = recv_json(&mut s1).await;
        if msg["type"] == "control-changed" {
            break msg;
        }
    };
    assert_eq!(changed1["hasControl"], json!(false));
}

/// End-to-end scenario 4 (§8): small writes closer than the debounce window
/// coalesce into a single published chunk.
#[tokio::test]
#[serial]
async fn adjacent_small_writes_coalesce_into_one_chunk() {
    let data_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    common::init_git_repo(repo_dir.path());
    let state = common::test_state(data_dir.path());
    let buffer = {
        let agent_id = create_agent(&state, repo_dir.path()).await;
        let agent = state.registry.get(&agent_id).unwrap();
        let tab_id = agent.first_tab_id().unwrap().to_string();
        let session = state.registry.tab_session(&agent_id, &tab_id).unwrap();
        session.start(80, 24).unwrap();
        let buffer = state.registry.buffer(&agent_id, &tab_id).unwrap();
        session.write(b"a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.write(b"b");
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.write(b"c");
        buffer
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    let (chunks, _) = buffer.snapshot(0);
    let combined: String = chunks.iter().map(|c| c.data.as_str()).collect();
    assert!(combined.contains('a') && combined.contains('b') && combined.contains('c'));
}
