//! Payment Repository
//!
//! 支付尝试表。`external_id`（处理方分配）UNIQUE —— 同一支付尝试
//! 在本系统里只有一行。终态一旦写入不再被后续通知覆盖
//! （first terminal wins，按行生效）。

use super::{BaseRepository, RepoResult, content_of};
use shared::models::{Payment, PaymentStatus};
use shared::util::now_millis;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "payment";

#[derive(Clone)]
pub struct PaymentRepository {
    base: BaseRepository,
}

impl PaymentRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// IPN 落库：external_id 不存在则创建，存在则按规则更新
    ///
    /// 已处于终态的行不接受任何状态变更（乱序投递时 `finished`
    /// 先到、`confirming` 后到，后者只更新 confirmations 之外的
    /// 字段一律丢弃）。返回更新后的行。
    pub async fn upsert_from_ipn(&self, incoming: &Payment) -> RepoResult<Payment> {
        let existing = self.find_by_external_id(&incoming.external_id).await?;
        match existing {
            None => {
                let insert = self
                    .base
                    .db()
                    .query("CREATE type::thing($tb, $id) CONTENT $data")
                    .bind(("tb", TABLE))
                    .bind(("id", incoming.id.clone()))
                    .bind(("data", content_of(incoming)?))
                    .await;
                match insert {
                    Ok(mut response) => match response.take::<surrealdb::Value>(0) {
                        Ok(_) => Ok(incoming.clone()),
                        Err(e) if super::is_unique_violation(&e) => {
                            // 并发首投递：另一写入者先到，改走更新路径
                            self.apply_update(incoming).await
                        }
                        Err(e) => Err(e.into()),
                    },
                    Err(e) if super::is_unique_violation(&e) => self.apply_update(incoming).await,
                    Err(e) => Err(e.into()),
                }
            }
            Some(_) => self.apply_update(incoming).await,
        }
    }

    /// 非终态行更新状态与确认数；终态行原样返回
    async fn apply_update(&self, incoming: &Payment) -> RepoResult<Payment> {
        let mut result = self
            .base
            .db()
            .query(
                "UPDATE payment
                 SET status = $status, confirmations = $conf,
                     amount_crypto = $amount, raw_payload = $raw, updated_at = $now
                 WHERE external_id = $eid
                   AND status NOT IN ['finished', 'underpaid', 'failed']
                 RETURN *, record::id(id) AS id",
            )
            .bind(("status", incoming.status))
            .bind(("conf", incoming.confirmations))
            .bind(("amount", incoming.amount_crypto))
            .bind(("raw", incoming.raw_payload.clone()))
            .bind(("now", now_millis()))
            .bind(("eid", incoming.external_id.clone()))
            .await?;
        let updated: Vec<Payment> = result.take(0)?;
        match updated.into_iter().next() {
            Some(p) => Ok(p),
            // 终态行不动，返回既有状态供调用方判断
            None => self
                .find_by_external_id(&incoming.external_id)
                .await?
                .ok_or_else(|| {
                    super::RepoError::NotFound(format!(
                        "Payment {} vanished during update",
                        incoming.external_id
                    ))
                }),
        }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> RepoResult<Option<Payment>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM payment
                 WHERE external_id = $eid LIMIT 1",
            )
            .bind(("eid", external_id.to_string()))
            .await?;
        let payments: Vec<Payment> = result.take(0)?;
        Ok(payments.into_iter().next())
    }

    pub async fn list_by_order(&self, order_id: &str) -> RepoResult<Vec<Payment>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM payment
                 WHERE order_id = $oid ORDER BY created_at ASC",
            )
            .bind(("oid", order_id.to_string()))
            .await?;
        let payments: Vec<Payment> = result.take(0)?;
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use rust_decimal::Decimal;
    use shared::util::new_id;

    fn sample_payment(external_id: &str, status: PaymentStatus) -> Payment {
        Payment {
            id: new_id(),
            external_id: external_id.into(),
            order_id: "order-1".into(),
            provider: "nowpay".into(),
            status,
            amount_fiat: Decimal::new(1999, 2),
            currency_fiat: "EUR".into(),
            amount_crypto: 0.00031,
            currency_crypto: "BTC".into(),
            confirmations: 0,
            raw_payload: serde_json::json!({}),
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let db = DbService::new_memory().await.unwrap();
        let repo = PaymentRepository::new(db.handle());

        let created = repo
            .upsert_from_ipn(&sample_payment("ext-1", PaymentStatus::Waiting))
            .await
            .unwrap();
        assert_eq!(created.status, PaymentStatus::Waiting);

        let mut next = sample_payment("ext-1", PaymentStatus::Confirming);
        next.confirmations = 2;
        let updated = repo.upsert_from_ipn(&next).await.unwrap();
        assert_eq!(updated.status, PaymentStatus::Confirming);
        assert_eq!(updated.confirmations, 2);

        // 行没有被第二次 upsert 复制
        let found = repo.find_by_external_id("ext-1").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let db = DbService::new_memory().await.unwrap();
        let repo = PaymentRepository::new(db.handle());

        repo.upsert_from_ipn(&sample_payment("ext-2", PaymentStatus::Finished))
            .await
            .unwrap();

        // 乱序到达的 confirming 不能把行拉回非终态
        let stale = sample_payment("ext-2", PaymentStatus::Confirming);
        let result = repo.upsert_from_ipn(&stale).await.unwrap();
        assert_eq!(result.status, PaymentStatus::Finished);
    }

    #[tokio::test]
    async fn test_list_by_order() {
        let db = DbService::new_memory().await.unwrap();
        let repo = PaymentRepository::new(db.handle());

        repo.upsert_from_ipn(&sample_payment("ext-a", PaymentStatus::Waiting))
            .await
            .unwrap();
        repo.upsert_from_ipn(&sample_payment("ext-b", PaymentStatus::Waiting))
            .await
            .unwrap();

        let payments = repo.list_by_order("order-1").await.unwrap();
        assert_eq!(payments.len(), 2);
    }
}
