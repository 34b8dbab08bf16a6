mod support;

use std::time::Duration;

use futures_util::SinkExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite};

use support::{next_json, next_of_type, send_json, TestServer};

#[tokio::test]
async fn health_and_stats_endpoints() {
    let server = TestServer::start().await;
    let client = Client::new();

    let health = client
        .get(server.http_url("/health"))
        .send()
        .await
        .expect("health request");
    assert_eq!(health.status(), StatusCode::OK);

    let _socket = server.join("stats-room").await;
    sleep(Duration::from_millis(50)).await;

    let stats: Value = client
        .get(server.http_url("/api/v1/stats"))
        .send()
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats json");
    assert_eq!(stats["connections"], 1);
    assert_eq!(stats["active_sessions"], 1);
    assert_eq!(stats["total_votes"], 0);
}

#[tokio::test]
async fn upgrade_without_session_is_rejected() {
    let server = TestServer::start().await;

    for url in [
        format!("ws://{}/", server.addr),
        format!("ws://{}/ws?session=%20%20", server.addr),
    ] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 400);
            }
            other => panic!("expected http 400, got {:?}", other.map(|_| ())),
        }
    }
}

#[tokio::test]
async fn votes_are_broadcast_and_replayed_to_newcomers() {
    let server = TestServer::start().await;
    let mut alice = server.join("planning").await;

    send_json(
        &mut alice,
        json!({"sender": "alice", "type": "points", "content": 5, "fingerprint": "fp-a", "timestamp": 1}),
    )
    .await;
    let echo = next_of_type(&mut alice, "points").await;
    assert_eq!(echo["content"], 5);
    assert_eq!(echo["sender"], "alice");

    let mut bob = server.join("planning").await;
    let replay = next_json(&mut bob).await;
    assert_eq!(replay["type"], "points");
    assert_eq!(replay["fingerprint"], "fp-a");
    assert_eq!(replay["content"], 5);

    let sync = next_of_type(&mut bob, "state_sync").await;
    assert_eq!(sync["sender"], "server");
    let snapshot: Value =
        serde_json::from_str(sync["content"].as_str().expect("snapshot string")).expect("snapshot");
    assert_eq!(snapshot["votes"]["fp-a"], 5);
    assert_eq!(snapshot["votesRevealed"], false);
    assert_eq!(snapshot["participants"][0]["name"], "alice");
}

#[tokio::test]
async fn reconnect_sees_vote_and_reveal() {
    let server = TestServer::start().await;
    let mut alice = server.join("retro").await;

    send_json(
        &mut alice,
        json!({"sender": "alice", "type": "points", "content": 5, "fingerprint": "fp-a"}),
    )
    .await;
    next_of_type(&mut alice, "points").await;
    send_json(
        &mut alice,
        json!({"sender": "alice", "type": "show_votes", "fingerprint": "fp-a"}),
    )
    .await;
    next_of_type(&mut alice, "show_votes").await;
    alice.close(None).await.expect("close");
    sleep(Duration::from_millis(50)).await;

    let mut again = server.join("retro").await;
    let revealed = next_json(&mut again).await;
    assert_eq!(revealed["type"], "show_votes");
    assert_eq!(revealed["content"], "votes_revealed");

    send_json(
        &mut again,
        json!({"sender": "alice", "type": "request_state", "fingerprint": "fp-a"}),
    )
    .await;
    let sync = next_of_type(&mut again, "state_sync").await;
    let snapshot: Value =
        serde_json::from_str(sync["content"].as_str().expect("snapshot string")).expect("snapshot");
    assert_eq!(snapshot["votes"]["fp-a"], 5);
    assert_eq!(snapshot["votesRevealed"], true);
}

#[tokio::test]
async fn malformed_frames_do_not_drop_the_connection() {
    let server = TestServer::start().await;
    let mut alice = server.join("noise").await;

    alice
        .send(tungstenite::Message::Text("not json".into()))
        .await
        .expect("send garbage");
    send_json(
        &mut alice,
        json!({"sender": "alice", "type": "chat", "content": "still here"}),
    )
    .await;

    let chat = next_of_type(&mut alice, "chat").await;
    assert_eq!(chat["content"], "still here");
    assert_eq!(server.hub.registry().connection_count().await, 1);
}

#[tokio::test]
async fn closing_socket_unregisters_and_user_left_notifies_peers() {
    let server = TestServer::start().await;
    let mut alice = server.join("standup").await;
    let mut bob = server.join("standup").await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(server.hub.registry().connection_count().await, 2);

    send_json(
        &mut alice,
        json!({"sender": "alice", "type": "user_left", "fingerprint": "fp-a"}),
    )
    .await;
    let left = next_of_type(&mut bob, "user_left").await;
    assert_eq!(left["sender"], "alice");

    bob.close(None).await.expect("close");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.hub.registry().connection_count().await, 0);
}
