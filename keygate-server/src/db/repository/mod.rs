//! Repository Module
//!
//! Repository-per-aggregate over the embedded SurrealDB.
//! Record keys are UUID strings assigned by the application
//! (`shared::util::new_id`), addressed as `(TABLE, id)`.

pub mod job;
pub mod key;
pub mod order;
pub mod payment;
pub mod product;
pub mod stock_item;
pub mod webhook_log;

// Re-exports
pub use job::{JobRepository, JobRow, JobStatus};
pub use key::KeyRepository;
pub use order::OrderRepository;
pub use payment::PaymentRepository;
pub use product::ProductRepository;
pub use stock_item::StockRepository;
pub use webhook_log::{Receipt, WebhookLogRepository};

use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<surrealdb::Error> for RepoError {
    fn from(err: surrealdb::Error) -> Self {
        if is_unique_violation(&err) {
            RepoError::Duplicate(err.to_string())
        } else {
            RepoError::Database(err.to_string())
        }
    }
}

/// 唯一索引冲突判定
///
/// SurrealDB 对 UNIQUE 索引冲突报 "already contains" / "index ... unique"。
/// 这是 webhook 去重和支付幂等的判定点。
pub fn is_unique_violation(err: &surrealdb::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("already contains") || msg.contains("unique") || msg.contains("duplicate")
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// 序列化为 CONTENT 载荷并剥掉 id 字段
///
/// 记录键由 `type::thing(table, id)` 承载；CONTENT 里再带 id 会和
/// SurrealDB 的记录指针字段冲突。读取时统一用
/// `record::id(id) AS id` 投影还原为纯字符串主键。
pub(crate) fn content_of<T: serde::Serialize>(value: &T) -> RepoResult<serde_json::Value> {
    let mut v = serde_json::to_value(value)
        .map_err(|e| RepoError::Validation(format!("Serialize failed: {e}")))?;
    if let Some(map) = v.as_object_mut() {
        map.remove("id");
    }
    Ok(v)
}

/// Base repository with database reference
#[derive(Clone)]
pub struct BaseRepository {
    db: Surreal<Db>,
}

impl BaseRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Surreal<Db> {
        &self.db
    }
}
