//! 状态推送消息类型

mod payload;

pub use payload::{BusMessage, EventType, StatusPayload};
