//! Order Repository
//!
//! 订单主表 + 条目。记录键 = 应用层 UUID（`type::thing` 定位），
//! 读取时用 `record::id(id) AS id` 还原为纯字符串主键。
//! 状态字段只由状态机推进后的调用方写入，仓储不做生命周期判断。

use super::{BaseRepository, RepoError, RepoResult, content_of};
use shared::models::{Order, OrderDetail, OrderItem, OrderStatus};
use shared::util::now_millis;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "order";
const ITEM_TABLE: &str = "order_item";

#[derive(Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// 创建订单及其全部条目
    pub async fn create_with_items(&self, order: &Order, items: &[OrderItem]) -> RepoResult<()> {
        self.base
            .db()
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", order.id.clone()))
            .bind(("data", content_of(order)?))
            .await?;

        for item in items {
            self.base
                .db()
                .query("CREATE type::thing($tb, $id) CONTENT $data")
                .bind(("tb", ITEM_TABLE))
                .bind(("id", item.id.clone()))
                .bind(("data", content_of(item)?))
                .await?;
        }
        Ok(())
    }

    pub async fn find_by_id(&self, order_id: &str) -> RepoResult<Option<Order>> {
        let mut result = self
            .base
            .db()
            .query("SELECT *, record::id(id) AS id FROM type::thing($tb, $id)")
            .bind(("tb", TABLE))
            .bind(("id", order_id.to_string()))
            .await?;
        let orders: Vec<Order> = result.take(0)?;
        Ok(orders.into_iter().next())
    }

    /// 必须存在，否则 NotFound（任务处理器用，order 缺失是不可重试错误）
    pub async fn get(&self, order_id: &str) -> RepoResult<Order> {
        self.find_by_id(order_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Order {order_id} not found")))
    }

    /// 按市场预订单 ID 反查订单
    pub async fn find_by_reservation_id(&self, reservation_id: &str) -> RepoResult<Option<Order>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM order
                 WHERE reservation_id = $rid LIMIT 1",
            )
            .bind(("rid", reservation_id.to_string()))
            .await?;
        let orders: Vec<Order> = result.take(0)?;
        Ok(orders.into_iter().next())
    }

    /// 写入新状态（调用方已通过状态机得出）
    pub async fn set_status(&self, order_id: &str, status: OrderStatus) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE type::thing($tb, $id) SET status = $status, updated_at = $now")
            .bind(("tb", TABLE))
            .bind(("id", order_id.to_string()))
            .bind(("status", status))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 记录市场预订单 ID（reserve 任务下单成功后）
    pub async fn set_reservation_id(&self, order_id: &str, reservation_id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE type::thing($tb, $id) SET reservation_id = $rid, updated_at = $now")
            .bind(("tb", TABLE))
            .bind(("id", order_id.to_string()))
            .bind(("rid", reservation_id.to_string()))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 完成邮件发送守卫：只有 flag 尚未置位时才翻转并返回 true
    ///
    /// 重投递/恢复路径重复调用返回 false，调用方据此跳过发信。
    pub async fn try_mark_email_sent(&self, order_id: &str) -> RepoResult<bool> {
        let mut result = self
            .base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET completion_email_sent = true, updated_at = $now
                 WHERE completion_email_sent = false
                 RETURN *, record::id(id) AS id",
            )
            .bind(("tb", TABLE))
            .bind(("id", order_id.to_string()))
            .bind(("now", now_millis()))
            .await?;
        let updated: Vec<Order> = result.take(0)?;
        Ok(!updated.is_empty())
    }

    // ========== Items ==========

    pub async fn items_by_order(&self, order_id: &str) -> RepoResult<Vec<OrderItem>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM order_item
                 WHERE order_id = $oid ORDER BY id",
            )
            .bind(("oid", order_id.to_string()))
            .await?;
        let items: Vec<OrderItem> = result.take(0)?;
        Ok(items)
    }

    pub async fn find_item(&self, item_id: &str) -> RepoResult<Option<OrderItem>> {
        let mut result = self
            .base
            .db()
            .query("SELECT *, record::id(id) AS id FROM type::thing($tb, $id)")
            .bind(("tb", ITEM_TABLE))
            .bind(("id", item_id.to_string()))
            .await?;
        let items: Vec<OrderItem> = result.take(0)?;
        Ok(items.into_iter().next())
    }

    /// 交付写回：签名链接 + 占用的库存条目（custom 路径）
    pub async fn mark_item_delivered(
        &self,
        item_id: &str,
        signed_url: &str,
        stock_item_id: Option<&str>,
    ) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET signed_url = $url, stock_item_id = $sid, delivered_at = $now",
            )
            .bind(("tb", ITEM_TABLE))
            .bind(("id", item_id.to_string()))
            .bind(("url", signed_url.to_string()))
            .bind(("sid", stock_item_id.map(|s| s.to_string())))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 恢复路径：仅重签链接，不动库存引用
    pub async fn refresh_item_url(&self, item_id: &str, signed_url: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE type::thing($tb, $id) SET signed_url = $url")
            .bind(("tb", ITEM_TABLE))
            .bind(("id", item_id.to_string()))
            .bind(("url", signed_url.to_string()))
            .await?;
        Ok(())
    }

    /// 订单详情（轮询读路径）
    pub async fn detail(&self, order_id: &str) -> RepoResult<OrderDetail> {
        let order = self.get(order_id).await?;
        let items = self.items_by_order(order_id).await?;
        Ok(OrderDetail { order, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use rust_decimal::Decimal;
    use shared::models::OrderSource;
    use shared::util::new_id;

    fn sample_order() -> Order {
        Order {
            id: new_id(),
            customer_email: "alice@example.com".into(),
            status: OrderStatus::Created,
            source: OrderSource::Custom,
            total: Decimal::new(1999, 2),
            currency: "EUR".into(),
            reservation_id: None,
            completion_email_sent: false,
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    fn sample_item(order_id: &str) -> OrderItem {
        OrderItem {
            id: new_id(),
            order_id: order_id.into(),
            product_id: "prod-1".into(),
            quantity: 1,
            unit_price: Decimal::new(1999, 2),
            signed_url: None,
            stock_item_id: None,
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let db = DbService::new_memory().await.unwrap();
        let repo = OrderRepository::new(db.handle());
        let order = sample_order();
        let item = sample_item(&order.id);
        repo.create_with_items(&order, std::slice::from_ref(&item))
            .await
            .unwrap();

        let found = repo.get(&order.id).await.unwrap();
        assert_eq!(found.customer_email, "alice@example.com");
        assert_eq!(found.status, OrderStatus::Created);

        let items = repo.items_by_order(&order.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, "prod-1");
    }

    #[tokio::test]
    async fn test_email_sent_guard_flips_once() {
        let db = DbService::new_memory().await.unwrap();
        let repo = OrderRepository::new(db.handle());
        let order = sample_order();
        repo.create_with_items(&order, &[]).await.unwrap();

        assert!(repo.try_mark_email_sent(&order.id).await.unwrap());
        // 第二次（重投递）不再翻转
        assert!(!repo.try_mark_email_sent(&order.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_item_delivery_roundtrip() {
        let db = DbService::new_memory().await.unwrap();
        let repo = OrderRepository::new(db.handle());
        let order = sample_order();
        let item = sample_item(&order.id);
        repo.create_with_items(&order, std::slice::from_ref(&item))
            .await
            .unwrap();

        repo.mark_item_delivered(&item.id, "https://vault/x", Some("stock-1"))
            .await
            .unwrap();
        let found = repo.find_item(&item.id).await.unwrap().unwrap();
        assert!(found.is_delivered());
        assert_eq!(found.stock_item_id.as_deref(), Some("stock-1"));
    }

    #[tokio::test]
    async fn test_find_by_reservation_id() {
        let db = DbService::new_memory().await.unwrap();
        let repo = OrderRepository::new(db.handle());
        let order = sample_order();
        repo.create_with_items(&order, &[]).await.unwrap();
        repo.set_reservation_id(&order.id, "MKT-42").await.unwrap();

        let found = repo.find_by_reservation_id("MKT-42").await.unwrap();
        assert_eq!(found.map(|o| o.id), Some(order.id));
    }
}
