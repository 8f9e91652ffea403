//! Webhook Idempotency Ledger Entry
//!
//! 每条入站通知一行，追加写入、热路径绝不删除。
//! 自然键 (external_id, source, status_tag) 上的 UNIQUE 索引
//! 是重复投递判定的唯一正确性机制。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which partner sent the notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSource {
    Payment,
    Marketplace,
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payment => write!(f, "payment"),
            Self::Marketplace => write!(f, "marketplace"),
        }
    }
}

/// 入站通知流水
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLogEntry {
    pub id: String,
    /// 对端签发的 ID（支付 ID / 市场预订单 ID）
    pub external_id: String,
    pub source: WebhookSource,
    /// 状态消歧标签 — 同一 external_id 的不同状态各自处理一次
    pub status_tag: String,
    /// 原始请求体（未解析）
    pub raw_payload: String,
    pub signature: String,
    pub signature_valid: bool,
    /// 只有副作用持久化提交后才置 true，且绝不回退
    pub processed: bool,
    pub order_id: Option<String>,
    /// 处理结果（结构化，供审计/排障）
    pub result: Option<serde_json::Value>,
    /// 重复投递计数（含首次）
    pub attempts: i64,
    pub created_at: i64,
    pub updated_at: i64,
}
