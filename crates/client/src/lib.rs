//! 会话客户端
//!
//! 连接状态机、重连退避、离线发送队列、心跳、AFK 判定以及本地会话镜像。
//! `ConnectionController` 不做任何 IO，`SessionClient` 负责在 tokio-tungstenite 上执行它给出的动作。

pub mod activity;
pub mod backoff;
pub mod controller;
pub mod driver;
pub mod error;
pub mod heartbeat;
pub mod mirror;
pub mod queue;
pub mod state;

pub use activity::{ActivityEvent, ActivityTracker};
pub use backoff::ReconnectPolicy;
pub use controller::{ClientAction, ClientEvent, ClientSettings, ConnectionController};
pub use driver::SessionClient;
pub use error::ClientError;
pub use heartbeat::{start_heartbeat, HeartbeatEmitter, HeartbeatTick, IntervalHeartbeat, ThreadHeartbeat};
pub use mirror::{SessionMirror, UserActivity};
pub use queue::OutboundQueue;
pub use state::ConnectionState;
