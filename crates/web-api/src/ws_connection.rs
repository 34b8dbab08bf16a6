use std::sync::Arc;

use application::{Outbound, OutboundReceiver, RouteOutcome, SessionHub};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, DisconnectReason, SessionId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// 单条 WebSocket 连接
///
/// 写任务只消费注册表里的出站通道，读循环把入站帧交给会话中枢。
/// 任何一侧结束都会让连接从中枢注销。
pub struct WebSocketConnection {
    socket: WebSocket,
    hub: Arc<SessionHub>,
    session: SessionId,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, hub: Arc<SessionHub>, session: SessionId) -> Self {
        Self {
            socket,
            hub,
            session,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            hub,
            session,
        } = self;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = match hub.connect(session.clone(), outbound_tx).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(session = %session, error = %err, "failed to register websocket connection");
                return;
            }
        };

        let (sender, mut incoming) = socket.split();
        let mut send_task = tokio::spawn(Self::write_loop(sender, outbound_rx, connection));

        let reason = tokio::select! {
            reason = Self::read_loop(&hub, connection, &mut incoming) => reason,
            result = &mut send_task => match result {
                Ok(reason) => reason,
                Err(err) => {
                    tracing::error!(connection = %connection, error = %err, "websocket writer panicked");
                    DisconnectReason::TransportError
                }
            },
        };

        hub.disconnect(connection, reason).await;
        tracing::debug!(session = %session, connection = %connection, reason = reason.as_str(), "websocket closed");
    }

    /// 写任务。服务端主动关闭时返回 `Closed`，写失败返回 `TransportError`
    async fn write_loop(
        mut sender: SplitSink<WebSocket, WsMessage>,
        mut outbound: OutboundReceiver,
        connection: ConnectionId,
    ) -> DisconnectReason {
        while let Some(frame) = outbound.recv().await {
            let result = match frame {
                Outbound::Text(text) => sender.send(WsMessage::Text(text.to_string().into())).await,
                Outbound::Ping => sender.send(WsMessage::Ping(Bytes::new())).await,
                Outbound::Close => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    return DisconnectReason::Closed;
                }
            };

            if let Err(err) = result {
                tracing::error!(connection = %connection, error = %err, "websocket write failed");
                return DisconnectReason::TransportError;
            }
        }
        DisconnectReason::Closed
    }

    async fn read_loop(
        hub: &SessionHub,
        connection: ConnectionId,
        incoming: &mut SplitStream<WebSocket>,
    ) -> DisconnectReason {
        while let Some(message) = incoming.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    match hub.handle_inbound(connection, text.as_str()).await {
                        Ok(RouteOutcome::Continue) => {}
                        Ok(RouteOutcome::Close) => return DisconnectReason::UserLeft,
                        Err(err) => {
                            tracing::warn!(connection = %connection, error = %err, "failed to handle inbound message");
                        }
                    }
                }
                Ok(WsMessage::Pong(_)) => hub.record_pong(connection).await,
                Ok(WsMessage::Close(_)) => return DisconnectReason::Closed,
                // axum 自动回复 ping
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Binary(_)) => {}
                Err(err) => {
                    tracing::error!(connection = %connection, error = %err, "websocket read failed");
                    return DisconnectReason::TransportError;
                }
            }
        }
        DisconnectReason::Closed
    }
}
