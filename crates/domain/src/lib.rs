//! 估点会话核心领域模型
//!
//! 包含线上消息格式、会话/计时器/在线状态的状态机、状态快照，以及投票统计规则。

pub mod consensus;
pub mod errors;
pub mod message;
pub mod presence;
pub mod session;
pub mod snapshot;
pub mod timer;
pub mod value_objects;

// 重新导出常用类型
pub use consensus::*;
pub use errors::*;
pub use message::*;
pub use presence::*;
pub use session::*;
pub use snapshot::*;
pub use timer::*;
pub use value_objects::*;
