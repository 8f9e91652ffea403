//! Database Module
//!
//! 嵌入式 SurrealDB。启动时定义表结构和唯一索引 —
//! webhook 流水和支付外部 ID 的 UNIQUE 索引是幂等机制的正确性来源，
//! 必须是真实数据库约束而非应用层检查。

pub mod repository;

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, RocksDb};

use crate::utils::AppError;

const NS: &str = "keygate";
const DB: &str = "keygate";

/// Database service — owns the embedded SurrealDB handle
#[derive(Clone)]
pub struct DbService {
    pub db: Surreal<Db>,
}

impl DbService {
    /// Open (or create) the on-disk database and apply schema
    pub async fn new(db_path: &str) -> Result<Self, AppError> {
        let db = Surreal::new::<RocksDb>(db_path)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;
        db.use_ns(NS)
            .use_db(DB)
            .await
            .map_err(|e| AppError::database(format!("Failed to select namespace: {e}")))?;

        let service = Self { db };
        service.define_schema().await?;
        tracing::info!("Database connection established (SurrealDB RocksDB)");
        Ok(service)
    }

    /// In-memory database for tests
    #[cfg(test)]
    pub async fn new_memory() -> Result<Self, AppError> {
        let db = Surreal::new::<surrealdb::engine::local::Mem>(())
            .await
            .map_err(|e| AppError::database(format!("Failed to open memory db: {e}")))?;
        db.use_ns(NS)
            .use_db(DB)
            .await
            .map_err(|e| AppError::database(format!("Failed to select namespace: {e}")))?;
        let service = Self { db };
        service.define_schema().await?;
        Ok(service)
    }

    /// 定义表和索引（幂等，可重复执行）
    ///
    /// - `webhook_log (external_id, source, status_tag)` UNIQUE：
    ///   重复投递在 INSERT 时被索引拒绝，这就是去重判定
    /// - `payment (external_id)` UNIQUE：同一支付尝试只有一行
    async fn define_schema(&self) -> Result<(), AppError> {
        self.db
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS order SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS order_item SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS payment SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS webhook_log SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS key_record SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS stock_item SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS product SCHEMALESS;
                DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

                DEFINE INDEX IF NOT EXISTS uniq_webhook_natural
                    ON TABLE webhook_log COLUMNS external_id, source, status_tag UNIQUE;
                DEFINE INDEX IF NOT EXISTS uniq_payment_external
                    ON TABLE payment COLUMNS external_id UNIQUE;

                DEFINE INDEX IF NOT EXISTS idx_order_item_order
                    ON TABLE order_item COLUMNS order_id;
                DEFINE INDEX IF NOT EXISTS idx_stock_product_state
                    ON TABLE stock_item COLUMNS product_id, state;
                DEFINE INDEX IF NOT EXISTS idx_job_status
                    ON TABLE job COLUMNS status;
                "#,
            )
            .await
            .map_err(|e| AppError::database(format!("Failed to apply schema: {e}")))?;
        tracing::info!("Database schema applied");
        Ok(())
    }

    pub fn handle(&self) -> Surreal<Db> {
        self.db.clone()
    }
}
