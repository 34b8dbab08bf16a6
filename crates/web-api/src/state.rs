use std::sync::Arc;

use application::{HubSettings, SessionHub, SystemClock};
use config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self { hub }
    }

    /// 按配置构建使用系统时钟的会话中枢
    pub fn from_config(config: &AppConfig) -> Self {
        let hub = SessionHub::new(HubSettings::from_config(config), Arc::new(SystemClock));
        Self::new(Arc::new(hub))
    }
}
