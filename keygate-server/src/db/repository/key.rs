//! Key Repository
//!
//! 已交付密钥的访问留痕。表名用 `key_record`（`key` 在查询语言里
//! 是保留字）。每次下载都盖访问戳：viewed_at（首访）、
//! download_count、来源 IP 与 UA。

use super::{BaseRepository, RepoResult, content_of};
use shared::models::Key;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "key_record";

#[derive(Clone)]
pub struct KeyRepository {
    base: BaseRepository,
}

impl KeyRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn create(&self, key: &Key) -> RepoResult<()> {
        self.base
            .db()
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", key.id.clone()))
            .bind(("data", content_of(key)?))
            .await?;
        Ok(())
    }

    pub async fn find_by_item(&self, order_item_id: &str) -> RepoResult<Option<Key>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM key_record
                 WHERE order_item_id = $iid LIMIT 1",
            )
            .bind(("iid", order_item_id.to_string()))
            .await?;
        let keys: Vec<Key> = result.take(0)?;
        Ok(keys.into_iter().next())
    }

    /// 访问盖戳：首访写 viewed_at，之后只累计次数和来源
    pub async fn record_access(
        &self,
        key_id: &str,
        ip: &str,
        user_agent: &str,
        now: i64,
    ) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET viewed_at = viewed_at ?? $now,
                     download_count += 1,
                     last_ip = $ip,
                     last_user_agent = $ua",
            )
            .bind(("tb", TABLE))
            .bind(("id", key_id.to_string()))
            .bind(("now", now))
            .bind(("ip", ip.to_string()))
            .bind(("ua", user_agent.to_string()))
            .await?;
        Ok(())
    }

    pub async fn list_by_order(&self, order_id: &str) -> RepoResult<Vec<Key>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM key_record
                 WHERE order_id = $oid ORDER BY created_at ASC",
            )
            .bind(("oid", order_id.to_string()))
            .await?;
        let keys: Vec<Key> = result.take(0)?;
        Ok(keys)
    }
}
