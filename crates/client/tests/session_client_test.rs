use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{HubSettings, SessionHub, SystemClock};
use client::{
    ActivityEvent, ClientEvent, ClientSettings, ConnectionState, ReconnectPolicy, SessionClient,
    SessionMirror,
};
use domain::{Content, PresenceStatus, TimerStatus};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};
use web_api::{router, AppState};

struct Server {
    addr: SocketAddr,
    hub: Arc<SessionHub>,
    _shutdown: oneshot::Sender<()>,
}

async fn start_server() -> Server {
    let settings = HubSettings {
        state_sync_delay: Duration::from_millis(20),
        tick_interval: Duration::from_millis(20),
        ..HubSettings::default()
    };
    let hub = Arc::new(SessionHub::new(settings, Arc::new(SystemClock)));
    let app = router(AppState::new(hub.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    Server {
        addr,
        hub,
        _shutdown: shutdown_tx,
    }
}

fn settings(addr: SocketAddr, name: &str, fingerprint: &str) -> ClientSettings {
    let mut settings = ClientSettings::new(format!("ws://{}", addr), "planning", name, fingerprint);
    settings.join_announce_delay = Duration::from_millis(20);
    settings
}

async fn connected(settings: ClientSettings) -> SessionClient {
    let (client, _events) = SessionClient::connect(settings);
    timeout(Duration::from_secs(3), client.wait_for(ConnectionState::Connected))
        .await
        .expect("connect in time")
        .expect("client running");
    client
}

async fn mirror_until(client: &SessionClient, check: impl Fn(&SessionMirror) -> bool) -> SessionMirror {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let mirror = client.mirror().await;
        if check(&mirror) {
            return mirror;
        }
        assert!(Instant::now() < deadline, "mirror never reached expected state");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn votes_reach_late_joiner_through_state_sync() {
    let server = start_server().await;
    let alice = connected(settings(server.addr, "alice", "fp-a")).await;
    alice.vote(5u64).expect("vote");
    mirror_until(&alice, |m| m.vote_of("fp-a") == Some(&Content::number(5))).await;

    let bob = connected(settings(server.addr, "bob", "fp-b")).await;
    let mirror = mirror_until(&bob, |m| {
        m.vote_of("fp-a") == Some(&Content::number(5)) && m.display_name("fp-a") == "alice"
    })
    .await;
    assert!(!mirror.votes_revealed());

    bob.vote(5u64).expect("vote");
    bob.reveal().expect("reveal");
    let mirror = mirror_until(&alice, |m| m.votes_revealed()).await;
    assert!(mirror.has_consensus());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn timer_expiry_reveals_votes_everywhere() {
    let server = start_server().await;
    let alice = connected(settings(server.addr, "alice", "fp-a")).await;
    let bob = connected(settings(server.addr, "bob", "fp-b")).await;

    alice.start_timer(Some(3)).expect("start");
    let mirror = mirror_until(&bob, |m| m.votes_revealed()).await;
    assert_eq!(mirror.timer().status, TimerStatus::Idle);
    assert_eq!(mirror.timer().remaining, 0);

    bob.clear_votes().expect("clear");
    mirror_until(&alice, |m| !m.votes_revealed() && m.description().is_empty()).await;
}

#[tokio::test]
async fn afk_status_is_reported_and_cleared_by_activity() {
    let server = start_server().await;
    let mut afk = settings(server.addr, "alice", "fp-a");
    afk.afk_threshold = Duration::from_millis(300);
    afk.status_check_interval = Duration::from_millis(20);
    afk.activity_debounce = Duration::from_millis(10);
    let alice = connected(afk).await;
    let bob = connected(settings(server.addr, "bob", "fp-b")).await;

    mirror_until(&bob, |m| {
        m.activity("fp-a").map(|a| a.status) == Some(PresenceStatus::Afk)
    })
    .await;

    alice.record_activity(ActivityEvent::Keyboard).expect("activity");
    mirror_until(&bob, |m| {
        m.activity("fp-a").map(|a| a.status) == Some(PresenceStatus::Online)
    })
    .await;
}

#[tokio::test]
async fn manual_disconnect_unregisters_and_stays_down() {
    let server = start_server().await;
    let alice = connected(settings(server.addr, "alice", "fp-a")).await;
    assert_eq!(server.hub.registry().connection_count().await, 1);

    alice.disconnect().expect("disconnect");
    timeout(Duration::from_secs(3), alice.wait_for(ConnectionState::Disconnected))
        .await
        .expect("disconnected in time")
        .expect("client running");

    let deadline = Instant::now() + Duration::from_secs(3);
    while server.hub.registry().connection_count().await > 0 {
        assert!(Instant::now() < deadline, "server still tracks the connection");
        sleep(Duration::from_millis(10)).await;
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.state(), ConnectionState::Disconnected);

    alice.reconnect().expect("reconnect");
    timeout(Duration::from_secs(3), alice.wait_for(ConnectionState::Connected))
        .await
        .expect("reconnected in time")
        .expect("client running");
}

#[tokio::test]
async fn unreachable_server_exhausts_reconnects() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr")
    };
    let mut unreachable = settings(addr, "alice", "fp-a");
    unreachable.reconnect = ReconnectPolicy {
        base: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 2,
    };
    unreachable.connect_timeout = Duration::from_secs(1);

    let (client, mut events) = SessionClient::connect(unreachable);
    let exhausted = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let ClientEvent::ReconnectExhausted { attempts } = event {
                return attempts;
            }
        }
        0
    })
    .await
    .expect("gave up in time");

    assert_eq!(exhausted, 2);
    assert_eq!(client.state(), ConnectionState::Error);
    client.chat("queued while down").expect("send accepted");
}

#[tokio::test]
async fn disconnect_cancels_hanging_handshake() {
    // 接受 TCP 连接但从不回应握手
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let mut settings = settings(addr, "alice", "fp-a");
    settings.connect_timeout = Duration::from_secs(10);
    let (client, _events) = SessionClient::connect(settings);
    timeout(Duration::from_secs(1), client.wait_for(ConnectionState::Connecting))
        .await
        .expect("connecting in time")
        .expect("client running");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    let started = Instant::now();
    client.disconnect().unwrap();
    timeout(Duration::from_millis(500), client.wait_for(ConnectionState::Disconnected))
        .await
        .expect("disconnect should not wait for the handshake timeout")
        .expect("client running");
    assert!(started.elapsed() < Duration::from_millis(500));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.shutdown().await;
    silent.abort();
}
