use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::OrderStatus;
use crate::util::now_millis;

// ==================== Event Type ====================

/// 总线事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// 订单状态变更（推送给订阅该订单的连接 + 管理连接）
    OrderStatus,
    /// 系统级通知（仅管理连接）
    Notification,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderStatus => write!(f, "order_status"),
            Self::Notification => write!(f, "notification"),
        }
    }
}

// ==================== Payloads ====================

/// 订单状态推送载荷（服务端 -> 客户端）
///
/// best-effort 推送；轮询读路径才是权威数据源。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub order_id: String,
    pub status: OrderStatus,
    /// 附加数据（如已交付条目数）
    pub detail: Option<serde_json::Value>,
    pub ts: i64,
}

/// 总线消息 — 事件类型 + JSON 载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl BusMessage {
    /// 构造订单状态推送消息
    pub fn order_status(order_id: &str, status: OrderStatus, detail: Option<serde_json::Value>) -> Self {
        let payload = StatusPayload {
            order_id: order_id.to_string(),
            status,
            detail,
            ts: now_millis(),
        };
        Self {
            event_type: EventType::OrderStatus,
            payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// 构造系统通知消息
    pub fn notification(title: &str, message: &str) -> Self {
        Self {
            event_type: EventType::Notification,
            payload: serde_json::json!({ "title": title, "message": message, "ts": now_millis() }),
        }
    }

    /// 解出状态载荷（非 OrderStatus 消息返回 None）
    pub fn as_status(&self) -> Option<StatusPayload> {
        if self.event_type != EventType::OrderStatus {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_roundtrip() {
        let msg = BusMessage::order_status("o1", OrderStatus::Paid, None);
        let payload = msg.as_status().expect("status payload");
        assert_eq!(payload.order_id, "o1");
        assert_eq!(payload.status, OrderStatus::Paid);
    }

    #[test]
    fn test_notification_is_not_status() {
        let msg = BusMessage::notification("t", "m");
        assert!(msg.as_status().is_none());
    }
}
