//! Stock Repository
//!
//! 本地密钥库存（custom 路径）。FIFO 预留：按 created_at 最早的
//! available 条目做条件 UPDATE，WHERE state = 'available' 保证
//! 并发下同一条目只被一个订单拿走。

use super::{BaseRepository, RepoError, RepoResult, content_of};
use rust_decimal::Decimal;
use shared::models::{StockItem, StockState};
use shared::util::now_millis;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "stock_item";

#[derive(Clone)]
pub struct StockRepository {
    base: BaseRepository,
}

impl StockRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// 入库一条密钥
    pub async fn insert(&self, item: &StockItem) -> RepoResult<()> {
        self.base
            .db()
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", item.id.clone()))
            .bind(("data", content_of(item)?))
            .await?;
        Ok(())
    }

    /// FIFO 预留下一条可用库存
    ///
    /// 先选最早的 available 条目，再条件 UPDATE 占位；被并发抢走时
    /// UPDATE 不命中，循环取下一条。库存耗尽返回 Validation ——
    /// 业务性失败，调用方不应重试。
    pub async fn reserve_next(&self, product_id: &str, order_id: &str) -> RepoResult<StockItem> {
        loop {
            let mut result = self
                .base
                .db()
                .query(
                    "SELECT *, record::id(id) AS id FROM stock_item
                     WHERE product_id = $pid AND state = 'available'
                     ORDER BY created_at ASC LIMIT 1",
                )
                .bind(("pid", product_id.to_string()))
                .await?;
            let candidates: Vec<StockItem> = result.take(0)?;
            let Some(candidate) = candidates.into_iter().next() else {
                return Err(RepoError::Validation(format!(
                    "No stock available for product {product_id}"
                )));
            };

            let mut claimed = self
                .base
                .db()
                .query(
                    "UPDATE type::thing($tb, $id)
                     SET state = 'reserved', reserved_by = $oid, updated_at = $now
                     WHERE state = 'available'
                     RETURN *, record::id(id) AS id",
                )
                .bind(("tb", TABLE))
                .bind(("id", candidate.id.clone()))
                .bind(("oid", order_id.to_string()))
                .bind(("now", now_millis()))
                .await?;
            let rows: Vec<StockItem> = claimed.take(0)?;
            if let Some(item) = rows.into_iter().next() {
                return Ok(item);
            }
            // 条目被并发订单抢走，取下一条
        }
    }

    /// 预留 → 已售：把该订单在此商品下的全部预留一条语句结转。
    ///
    /// WHERE state = 'reserved' 使其幂等，重投递的结转是 no-op；
    /// 不存在"半条 UPDATE"，要么整批翻转要么报错重来。
    pub async fn mark_sold(
        &self,
        product_id: &str,
        order_id: &str,
        sold_price: Decimal,
    ) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE stock_item
                 SET state = 'sold', sold_price = $price, updated_at = $now
                 WHERE product_id = $pid AND reserved_by = $oid AND state = 'reserved'",
            )
            .bind(("pid", product_id.to_string()))
            .bind(("oid", order_id.to_string()))
            .bind(("price", sold_price))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 预留 → 可用（交付失败回滚，密钥回到队尾之前的位置）
    pub async fn release(&self, item_id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET state = 'available', reserved_by = NONE, updated_at = $now
                 WHERE state = 'reserved'",
            )
            .bind(("tb", TABLE))
            .bind(("id", item_id.to_string()))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, item_id: &str) -> RepoResult<Option<StockItem>> {
        let mut result = self
            .base
            .db()
            .query("SELECT *, record::id(id) AS id FROM type::thing($tb, $id)")
            .bind(("tb", TABLE))
            .bind(("id", item_id.to_string()))
            .await?;
        let items: Vec<StockItem> = result.take(0)?;
        Ok(items.into_iter().next())
    }

    pub async fn count_available(&self, product_id: &str) -> RepoResult<usize> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT count() AS total FROM stock_item
                 WHERE product_id = $pid AND state = 'available'
                 GROUP ALL",
            )
            .bind(("pid", product_id.to_string()))
            .await?;
        #[derive(serde::Deserialize)]
        struct Row {
            total: usize,
        }
        let rows: Vec<Row> = result.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use shared::util::new_id;

    fn stock(product_id: &str, payload: &str, created_at: i64) -> StockItem {
        StockItem {
            id: new_id(),
            product_id: product_id.into(),
            payload: payload.into(),
            state: StockState::Available,
            reserved_by: None,
            sold_price: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_reserve_is_fifo() {
        let db = DbService::new_memory().await.unwrap();
        let repo = StockRepository::new(db.handle());
        repo.insert(&stock("p1", "KEY-NEWER", 200)).await.unwrap();
        repo.insert(&stock("p1", "KEY-OLDER", 100)).await.unwrap();

        let first = repo.reserve_next("p1", "order-1").await.unwrap();
        assert_eq!(first.payload, "KEY-OLDER");
        assert_eq!(first.state, StockState::Reserved);
        assert_eq!(first.reserved_by.as_deref(), Some("order-1"));

        let second = repo.reserve_next("p1", "order-2").await.unwrap();
        assert_eq!(second.payload, "KEY-NEWER");
    }

    #[tokio::test]
    async fn test_exhausted_stock_is_validation_error() {
        let db = DbService::new_memory().await.unwrap();
        let repo = StockRepository::new(db.handle());
        repo.insert(&stock("p1", "K", 1)).await.unwrap();
        repo.reserve_next("p1", "order-1").await.unwrap();

        let err = repo.reserve_next("p1", "order-2").await.unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[tokio::test]
    async fn test_release_returns_item_to_pool() {
        let db = DbService::new_memory().await.unwrap();
        let repo = StockRepository::new(db.handle());
        repo.insert(&stock("p1", "K", 1)).await.unwrap();

        let reserved = repo.reserve_next("p1", "order-1").await.unwrap();
        repo.release(&reserved.id).await.unwrap();

        assert_eq!(repo.count_available("p1").await.unwrap(), 1);
        let again = repo.reserve_next("p1", "order-2").await.unwrap();
        assert_eq!(again.id, reserved.id);
    }

    #[tokio::test]
    async fn test_mark_sold_is_final() {
        let db = DbService::new_memory().await.unwrap();
        let repo = StockRepository::new(db.handle());
        repo.insert(&stock("p1", "K", 1)).await.unwrap();

        let reserved = repo.reserve_next("p1", "order-1").await.unwrap();
        repo.mark_sold("p1", "order-1", Decimal::new(999, 2))
            .await
            .unwrap();

        let found = repo.find_by_id(&reserved.id).await.unwrap().unwrap();
        assert_eq!(found.state, StockState::Sold);
        assert_eq!(found.sold_price, Some(Decimal::new(999, 2)));
        // sold 条目不会再被 release 捞回
        repo.release(&reserved.id).await.unwrap();
        assert_eq!(repo.count_available("p1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_sold_covers_whole_order_and_spares_others() {
        let db = DbService::new_memory().await.unwrap();
        let repo = StockRepository::new(db.handle());
        repo.insert(&stock("p1", "K1", 1)).await.unwrap();
        repo.insert(&stock("p1", "K2", 2)).await.unwrap();
        repo.insert(&stock("p1", "K3", 3)).await.unwrap();

        let a1 = repo.reserve_next("p1", "order-a").await.unwrap();
        let a2 = repo.reserve_next("p1", "order-a").await.unwrap();
        let other = repo.reserve_next("p1", "order-b").await.unwrap();

        repo.mark_sold("p1", "order-a", Decimal::new(1999, 2))
            .await
            .unwrap();
        // 再结转一次是 no-op
        repo.mark_sold("p1", "order-a", Decimal::new(1, 0))
            .await
            .unwrap();

        for id in [&a1.id, &a2.id] {
            let row = repo.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(row.state, StockState::Sold);
            assert_eq!(row.sold_price, Some(Decimal::new(1999, 2)));
        }
        // 别的订单的预留不受影响
        let row = repo.find_by_id(&other.id).await.unwrap().unwrap();
        assert_eq!(row.state, StockState::Reserved);
    }
}
