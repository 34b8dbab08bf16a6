//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 升级后把每条连接交给会话中枢，
//! 另有健康检查和运行统计接口。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::WebSocketConnection;
