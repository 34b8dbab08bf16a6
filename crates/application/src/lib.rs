//! 应用层实现。
//!
//! 这里提供围绕领域模型的会话服务：连接注册与广播、会话状态存储、
//! 在线巡检、倒计时驱动、消息路由以及状态同步。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod hub;
pub mod maintenance;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session_store;
pub mod sync;
pub mod timer_service;

pub use broadcaster::{BroadcastError, BroadcastReport, MessageBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use hub::{HubSettings, HubStats, SessionHub};
pub use maintenance::{spawn_maintenance, MaintenanceIntervals};
pub use presence::{PresenceMonitor, SweepReport};
pub use registry::{ConnectionRecord, ConnectionRegistry, Outbound, OutboundReceiver, OutboundSender};
pub use router::{MessageRouter, Route, RouteOutcome};
pub use session_store::{SessionStats, SessionStore};
pub use sync::StateSync;
pub use timer_service::TimerService;

#[cfg(any(test, feature = "testing"))]
pub use broadcaster::MockMessageBroadcaster;
