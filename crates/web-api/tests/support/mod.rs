#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{HubSettings, SessionHub, SystemClock};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 运行在随机端口上的测试服务器
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<SessionHub>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let settings = HubSettings {
            state_sync_delay: Duration::from_millis(50),
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

        Self {
            addr,
            hub,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, session: &str) -> String {
        format!("ws://{}/?session={}", self.addr, session)
    }

    pub async fn join(&self, session: &str) -> Socket {
        let (socket, _) = connect_async(self.ws_url(session))
            .await
            .expect("websocket connect");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_json(socket: &mut Socket, value: Value) {
    socket
        .send(TungsteniteMessage::Text(value.to_string().into()))
        .await
        .expect("send");
}

/// 读取下一条文本消息，跳过控制帧
pub async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("json");
        }
    }
}

/// 一直读到指定类型的消息
pub async fn next_of_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let value = next_json(socket).await;
        if value["type"] == kind {
            return value;
        }
    }
}
