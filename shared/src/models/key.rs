//! Key Audit Record
//!
//! 每个已交付的密钥一条审计记录，交付时由编排器创建，之后只读 + 访问打点。

use serde::{Deserialize, Serialize};

/// Audit record for a delivered secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    pub order_item_id: String,
    pub order_id: String,
    /// 对象存储引用（vault 内路径）
    pub object_ref: String,
    /// 首次查看时间
    pub viewed_at: Option<i64>,
    pub download_count: i64,
    pub last_ip: Option<String>,
    pub last_user_agent: Option<String>,
    pub created_at: i64,
}
