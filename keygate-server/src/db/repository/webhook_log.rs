//! Webhook Idempotency Ledger
//!
//! 每条入站通知一行。自然键 (external_id, source, status_tag) 的 UNIQUE
//! 索引是去重的唯一正确性机制：并发重复插入时，第一个写入者继续处理，
//! 其余拿到 Duplicate 并以"已处理"语义返回 200。
//! 热路径只 INSERT / UPDATE，绝不删除。

use super::{BaseRepository, RepoError, RepoResult, content_of};
use shared::models::{WebhookLogEntry, WebhookSource};
use shared::util::{new_id, now_millis};
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "webhook_log";

/// `record_receipt` 的结果：要么本次为首次受理，要么命中既有行
pub enum Receipt {
    /// 首次受理，继续执行副作用
    Fresh(WebhookLogEntry),
    /// 重复投递（唯一索引拒绝），副作用不再执行
    Duplicate(WebhookLogEntry),
}

#[derive(Clone)]
pub struct WebhookLogRepository {
    base: BaseRepository,
}

impl WebhookLogRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// 登记入站通知
    ///
    /// 先尝试 INSERT（processed=false）；唯一索引冲突说明同一
    /// (external_id, source, status_tag) 已受理过 —— 递增既有行的
    /// attempts 计数并返回 [`Receipt::Duplicate`]。
    pub async fn record_receipt(
        &self,
        external_id: &str,
        source: WebhookSource,
        status_tag: &str,
        raw_payload: &str,
        signature: &str,
        signature_valid: bool,
    ) -> RepoResult<Receipt> {
        let entry = WebhookLogEntry {
            id: new_id(),
            external_id: external_id.to_string(),
            source,
            status_tag: status_tag.to_string(),
            raw_payload: raw_payload.to_string(),
            signature: signature.to_string(),
            signature_valid,
            processed: false,
            order_id: None,
            result: None,
            attempts: 1,
            created_at: now_millis(),
            updated_at: now_millis(),
        };

        let insert = self
            .base
            .db()
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", entry.id.clone()))
            .bind(("data", content_of(&entry)?))
            .await;

        match insert {
            Ok(mut response) => {
                // CREATE 的错误在语句结果里，而不是传输层
                match response.take::<surrealdb::Value>(0) {
                    Ok(_) => Ok(Receipt::Fresh(entry)),
                    Err(e) if super::is_unique_violation(&e) => {
                        self.duplicate_hit(external_id, source, status_tag, raw_payload, signature, signature_valid)
                            .await
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) if super::is_unique_violation(&e) => {
                self.duplicate_hit(external_id, source, status_tag, raw_payload, signature, signature_valid)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 重复投递：递增 attempts，返回既有行。
    ///
    /// 未处理的行把载荷和签名刷新成本次投递的现场 —— 重投递按它
    /// 重新执行，审计不能停留在上一次（可能是伪造的）尝试上。
    /// 已处理的行只计数，保留首次成功处理时的现场。
    async fn duplicate_hit(
        &self,
        external_id: &str,
        source: WebhookSource,
        status_tag: &str,
        raw_payload: &str,
        signature: &str,
        signature_valid: bool,
    ) -> RepoResult<Receipt> {
        let mut result = self
            .base
            .db()
            .query(
                "UPDATE webhook_log
                 SET raw_payload = $raw, signature = $sig, signature_valid = $valid
                 WHERE external_id = $eid AND source = $src AND status_tag = $tag
                   AND processed = false;
                 UPDATE webhook_log
                 SET attempts += 1, updated_at = $now
                 WHERE external_id = $eid AND source = $src AND status_tag = $tag
                 RETURN *, record::id(id) AS id",
            )
            .bind(("raw", raw_payload.to_string()))
            .bind(("sig", signature.to_string()))
            .bind(("valid", signature_valid))
            .bind(("now", now_millis()))
            .bind(("eid", external_id.to_string()))
            .bind(("src", source))
            .bind(("tag", status_tag.to_string()))
            .await?;
        let entries: Vec<WebhookLogEntry> = result.take(1)?;
        entries
            .into_iter()
            .next()
            .map(Receipt::Duplicate)
            .ok_or_else(|| {
                // 索引说有、查询说无：并发窗口内行尚不可见，按重复处理
                RepoError::Duplicate(format!(
                    "Webhook ({external_id}, {source}, {status_tag}) raced a concurrent insert"
                ))
            })
    }

    /// 副作用是否已应用过（必须在任何副作用之前检查）
    pub async fn already_processed(
        &self,
        external_id: &str,
        source: WebhookSource,
        status_tag: &str,
    ) -> RepoResult<bool> {
        Ok(self
            .find_by_natural_key(external_id, source, status_tag)
            .await?
            .is_some_and(|e| e.processed))
    }

    /// 置 processed=true —— 唯一入口，只在副作用持久化提交之后调用
    pub async fn mark_processed(
        &self,
        entry_id: &str,
        order_id: Option<&str>,
        result: serde_json::Value,
    ) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET processed = true, order_id = $oid, result = $result, updated_at = $now",
            )
            .bind(("tb", TABLE))
            .bind(("id", entry_id.to_string()))
            .bind(("oid", order_id.map(|s| s.to_string())))
            .bind(("result", result))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 签名校验失败也留痕（processed 永远 false），并记录结果
    pub async fn mark_rejected(&self, entry_id: &str, reason: &str) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET result = $result, updated_at = $now",
            )
            .bind(("tb", TABLE))
            .bind(("id", entry_id.to_string()))
            .bind(("result", serde_json::json!({ "rejected": reason })))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    pub async fn find_by_natural_key(
        &self,
        external_id: &str,
        source: WebhookSource,
        status_tag: &str,
    ) -> RepoResult<Option<WebhookLogEntry>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM webhook_log
                 WHERE external_id = $eid AND source = $src AND status_tag = $tag
                 LIMIT 1",
            )
            .bind(("eid", external_id.to_string()))
            .bind(("src", source))
            .bind(("tag", status_tag.to_string()))
            .await?;
        let entries: Vec<WebhookLogEntry> = result.take(0)?;
        Ok(entries.into_iter().next())
    }

    /// 按订单查询流水（管理端审计）
    pub async fn list_by_order(&self, order_id: &str) -> RepoResult<Vec<WebhookLogEntry>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM webhook_log
                 WHERE order_id = $oid ORDER BY created_at ASC",
            )
            .bind(("oid", order_id.to_string()))
            .await?;
        let entries: Vec<WebhookLogEntry> = result.take(0)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;

    async fn repo() -> WebhookLogRepository {
        let db = DbService::new_memory().await.unwrap();
        WebhookLogRepository::new(db.handle())
    }

    #[tokio::test]
    async fn test_first_receipt_is_fresh() {
        let repo = repo().await;
        let receipt = repo
            .record_receipt("pay-1", WebhookSource::Payment, "finished", "{}", "sig", true)
            .await
            .unwrap();
        match receipt {
            Receipt::Fresh(entry) => {
                assert!(!entry.processed);
                assert_eq!(entry.attempts, 1);
            }
            Receipt::Duplicate(_) => panic!("first receipt must be fresh"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_receipt_hits_unique_index() {
        let repo = repo().await;
        repo.record_receipt("pay-1", WebhookSource::Payment, "finished", "{}", "sig", true)
            .await
            .unwrap();
        let second = repo
            .record_receipt("pay-1", WebhookSource::Payment, "finished", "{}", "sig", true)
            .await
            .unwrap();
        match second {
            Receipt::Duplicate(entry) => assert_eq!(entry.attempts, 2),
            Receipt::Fresh(_) => panic!("duplicate must not be fresh"),
        }
    }

    #[tokio::test]
    async fn test_redelivery_refreshes_unprocessed_row() {
        let repo = repo().await;
        // 首次投递签名坏掉（比如被伪造），行停在未处理
        repo.record_receipt(
            "pay-1",
            WebhookSource::Payment,
            "finished",
            r#"{"forged":true}"#,
            "bad-sig",
            false,
        )
        .await
        .unwrap();

        let second = repo
            .record_receipt(
                "pay-1",
                WebhookSource::Payment,
                "finished",
                r#"{"forged":false}"#,
                "good-sig",
                true,
            )
            .await
            .unwrap();

        let Receipt::Duplicate(entry) = second else {
            panic!("duplicate expected");
        };
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.raw_payload, r#"{"forged":false}"#);
        assert_eq!(entry.signature, "good-sig");
        assert!(entry.signature_valid);
    }

    #[tokio::test]
    async fn test_redelivery_keeps_processed_row_audit() {
        let repo = repo().await;
        let Receipt::Fresh(entry) = repo
            .record_receipt("pay-1", WebhookSource::Payment, "finished", "{}", "sig", true)
            .await
            .unwrap()
        else {
            panic!("fresh expected");
        };
        repo.mark_processed(&entry.id, Some("order-1"), serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let late = repo
            .record_receipt(
                "pay-1",
                WebhookSource::Payment,
                "finished",
                r#"{"late":true}"#,
                "other-sig",
                false,
            )
            .await
            .unwrap();

        // 已处理的行只涨计数，现场不被晚到的重复覆盖
        let Receipt::Duplicate(entry) = late else {
            panic!("duplicate expected");
        };
        assert!(entry.processed);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.raw_payload, "{}");
        assert_eq!(entry.signature, "sig");
        assert!(entry.signature_valid);
    }

    #[tokio::test]
    async fn test_same_external_id_different_status_is_fresh() {
        let repo = repo().await;
        repo.record_receipt("pay-1", WebhookSource::Payment, "waiting", "{}", "s", true)
            .await
            .unwrap();
        let receipt = repo
            .record_receipt("pay-1", WebhookSource::Payment, "finished", "{}", "s", true)
            .await
            .unwrap();
        assert!(matches!(receipt, Receipt::Fresh(_)));
    }

    #[tokio::test]
    async fn test_same_id_different_source_is_fresh() {
        let repo = repo().await;
        repo.record_receipt("x-1", WebhookSource::Payment, "finished", "{}", "s", true)
            .await
            .unwrap();
        let receipt = repo
            .record_receipt("x-1", WebhookSource::Marketplace, "finished", "{}", "s", true)
            .await
            .unwrap();
        assert!(matches!(receipt, Receipt::Fresh(_)));
    }

    #[tokio::test]
    async fn test_processed_flag_lifecycle() {
        let repo = repo().await;
        let Receipt::Fresh(entry) = repo
            .record_receipt("pay-2", WebhookSource::Payment, "finished", "{}", "s", true)
            .await
            .unwrap()
        else {
            panic!("fresh expected");
        };

        assert!(
            !repo
                .already_processed("pay-2", WebhookSource::Payment, "finished")
                .await
                .unwrap()
        );

        repo.mark_processed(&entry.id, Some("order-1"), serde_json::json!({"ok": true}))
            .await
            .unwrap();

        assert!(
            repo.already_processed("pay-2", WebhookSource::Payment, "finished")
                .await
                .unwrap()
        );
        let stored = repo
            .find_by_natural_key("pay-2", WebhookSource::Payment, "finished")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.order_id.as_deref(), Some("order-1"));
    }
}
