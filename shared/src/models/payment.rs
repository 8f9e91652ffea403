//! Payment Model
//!
//! 一个订单可能有多次支付尝试。`external_id` 是支付处理方签发的全局唯一 ID，
//! 也是该渠道通知的唯一去重键（数据库 UNIQUE 索引）。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment status, mirroring the processor's vocabulary verbatim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Waiting,
    Confirming,
    Confirmed,
    Finished,
    Underpaid,
    Failed,
}

impl PaymentStatus {
    /// 该支付行是否已到终态（终态后同一支付行不再更新）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Underpaid | Self::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Confirming => "confirming",
            Self::Confirmed => "confirmed",
            Self::Finished => "finished",
            Self::Underpaid => "underpaid",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// 支付尝试记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// 支付处理方签发的 ID — 全局唯一，IPN 去重键
    pub external_id: String,
    pub order_id: String,
    /// 渠道标签（如 "nowcrypto"）
    pub provider: String,
    pub status: PaymentStatus,
    /// 法币金额
    pub amount_fiat: Decimal,
    pub currency_fiat: String,
    /// 加密货币金额（仅审计用，镜像自通知原文）
    pub amount_crypto: f64,
    pub currency_crypto: String,
    /// 链上确认数
    pub confirmations: i32,
    /// 最近一次通知的原始载荷（审计）
    pub raw_payload: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Underpaid).unwrap(),
            "\"underpaid\""
        );
        let s: PaymentStatus = serde_json::from_str("\"confirming\"").unwrap();
        assert_eq!(s, PaymentStatus::Confirming);
    }

    #[test]
    fn test_terminal_payment_statuses() {
        assert!(PaymentStatus::Finished.is_terminal());
        assert!(PaymentStatus::Underpaid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Confirming.is_terminal());
    }
}
