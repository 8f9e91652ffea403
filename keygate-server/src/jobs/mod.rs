//! 持久任务队列
//!
//! 任务先落库再入内存通道，至少执行一次；处理器必须幂等。
//! 失败分两类：Retryable 走指数退避重试，Fatal 直接入死信。
//! 重试耗尽同样入死信 —— 任务永远不会被无声丢弃。

pub mod dispatcher;
pub mod handler;

pub use dispatcher::{JobDispatcher, JobRunner, RetryPolicy};
pub use handler::JobExecutor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::ServiceError;

/// 队列契约：四种任务载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// 支付完成后的首次履约（预留库存或下市场预订单）
    Reserve { order_id: String },
    /// 市场已交付，拉取密钥
    FetchKeys {
        marketplace_order_id: String,
        order_id: String,
    },
    /// 市场状态通知驱动的收尾
    MarketplaceWebhook {
        order_id: String,
        reservation_id: String,
        status: String,
    },
    /// 市场单方取消
    OrderCanceled { reservation_id: String },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Reserve { .. } => "reserve",
            JobKind::FetchKeys { .. } => "fetch_keys",
            JobKind::MarketplaceWebhook { .. } => "marketplace_webhook",
            JobKind::OrderCanceled { .. } => "order_canceled",
        }
    }

    /// 关联订单（死信页按订单检索用；取消任务只有预订单 ID）
    pub fn order_id(&self) -> Option<&str> {
        match self {
            JobKind::Reserve { order_id }
            | JobKind::FetchKeys { order_id, .. }
            | JobKind::MarketplaceWebhook { order_id, .. } => Some(order_id),
            JobKind::OrderCanceled { .. } => None,
        }
    }
}

/// 任务执行失败
#[derive(Debug, Error)]
pub enum JobError {
    /// 基础设施瞬时故障：退避后重试
    #[error("Retryable: {0}")]
    Retryable(String),

    /// 业务性失败：重试注定无效，直接入死信
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl From<ServiceError> for JobError {
    fn from(err: ServiceError) -> Self {
        if err.is_transient() {
            JobError::Retryable(err.to_string())
        } else {
            JobError::Fatal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_is_tagged() {
        let kind = JobKind::FetchKeys {
            marketplace_order_id: "MKT-1".into(),
            order_id: "o1".into(),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "fetch_keys");
        assert_eq!(value["order_id"], "o1");
        let back: JobKind = serde_json::from_value(value).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_order_id_extraction() {
        assert_eq!(
            JobKind::Reserve {
                order_id: "o1".into()
            }
            .order_id(),
            Some("o1")
        );
        assert_eq!(
            JobKind::OrderCanceled {
                reservation_id: "r1".into()
            }
            .order_id(),
            None
        );
    }

    #[test]
    fn test_error_classification() {
        let retryable: JobError = ServiceError::Transient("timeout".into()).into();
        assert!(matches!(retryable, JobError::Retryable(_)));
        let fatal: JobError = ServiceError::Business("out of stock".into()).into();
        assert!(matches!(fatal, JobError::Fatal(_)));
        let fatal: JobError = ServiceError::DuplicateExternalId("x".into()).into();
        assert!(matches!(fatal, JobError::Fatal(_)));
    }
}
