//! Fulfillment Orchestrator
//!
//! 履约编排：按订单来源分流。
//!
//! - **custom**：本地库存 FIFO 预留 → 编码信封 → 入库对象存储 →
//!   签发限时链接 → 留痕 → 预留结转已售 → 推进 fulfilled。
//!   条目交付前失败，先把预留放回池子再传播错误；结转失败时
//!   订单停在 paid，重投递补结转。
//! - **marketplace**：以订单 ID 为 external_id 下市场预订单
//!   （重复时检索认领既有预订单），交付由市场 webhook 驱动。
//!
//! 每个入口都可被重投递的任务重复执行：已 fulfilled 的订单直接
//! 返回既有结果，已交付的条目跳过，完成邮件由 flag 守卫。

use std::sync::Arc;

use shared::models::{Key, Order, OrderItem, OrderSource, OrderStatus, Product};
use shared::util::{new_id, now_millis};

use crate::db::repository::{
    KeyRepository, OrderRepository, ProductRepository, RepoError,
};
use crate::fulfillment::envelope;
use crate::jobs::{JobDispatcher, JobKind};
use crate::message::StatusBus;
use crate::services::{
    InventoryService, MarketplaceApi, MarketplaceKey, Notifier, OrderCompletedSummary,
    ProductLine, ServiceError, ServiceResult, StorageClient,
};

fn map_repo_err(err: RepoError) -> ServiceError {
    match err {
        RepoError::Database(msg) => ServiceError::Transient(msg),
        other => ServiceError::Business(other.to_string()),
    }
}

pub struct Orchestrator {
    orders: OrderRepository,
    products: ProductRepository,
    keys: KeyRepository,
    marketplace: Arc<dyn MarketplaceApi>,
    storage: Arc<dyn StorageClient>,
    inventory: Arc<dyn InventoryService>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<StatusBus>,
    dispatcher: JobDispatcher,
    /// 签名链接有效期（秒）
    url_ttl_secs: u64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: OrderRepository,
        products: ProductRepository,
        keys: KeyRepository,
        marketplace: Arc<dyn MarketplaceApi>,
        storage: Arc<dyn StorageClient>,
        inventory: Arc<dyn InventoryService>,
        notifier: Arc<dyn Notifier>,
        bus: Arc<StatusBus>,
        dispatcher: JobDispatcher,
        url_ttl_secs: u64,
    ) -> Self {
        Self {
            orders,
            products,
            keys,
            marketplace,
            storage,
            inventory,
            notifier,
            bus,
            dispatcher,
            url_ttl_secs,
        }
    }

    // ==================== 入口：reserve 任务 ====================

    /// 履约入口。已 fulfilled 的订单是幂等 no-op。
    pub async fn fulfill_order(&self, order_id: &str) -> ServiceResult<()> {
        let order = self.orders.get(order_id).await.map_err(map_repo_err)?;

        if order.status == OrderStatus::Fulfilled {
            tracing::debug!(order_id = %order_id, "Order already fulfilled, skipping");
            return Ok(());
        }
        if order.status != OrderStatus::Paid {
            return Err(ServiceError::Business(format!(
                "Order {order_id} is {} — fulfillment requires paid",
                order.status
            )));
        }

        match order.source {
            OrderSource::Custom => self.fulfill_from_stock(&order).await,
            OrderSource::Marketplace => self.reserve_on_marketplace(&order).await,
        }
    }

    // ==================== Custom 路径 ====================

    async fn fulfill_from_stock(&self, order: &Order) -> ServiceResult<()> {
        let items = self
            .orders
            .items_by_order(&order.id)
            .await
            .map_err(map_repo_err)?;

        for item in items.iter().filter(|i| !i.is_delivered()) {
            self.deliver_stock_item(order, item).await?;
        }
        // 结转在 finalize 之前：失败时订单仍是 paid，重投递会把
        // 交付循环跳过（条目已交付）并再次走到这里补结转
        self.settle_stock(order, &items).await?;
        self.finalize_delivery(&order.id).await
    }

    /// 全部条目交付后把本订单的预留结转为已售（幂等 UPDATE）
    async fn settle_stock(&self, order: &Order, items: &[OrderItem]) -> ServiceResult<()> {
        for item in items {
            self.inventory
                .mark_sold(&item.product_id, &order.id, item.unit_price)
                .await?;
        }
        Ok(())
    }

    /// 单条目交付：预留 → 信封 → 入库 → 标记
    ///
    /// 预留之后任何失败都先 release 再传播。
    async fn deliver_stock_item(&self, order: &Order, item: &OrderItem) -> ServiceResult<()> {
        let product = self
            .products
            .get(&item.product_id)
            .await
            .map_err(map_repo_err)?;

        let mut reserved_ids: Vec<String> = Vec::new();
        let mut payloads: Vec<String> = Vec::new();
        for _ in 0..item.quantity.max(1) {
            match self.inventory.reserve_item(&item.product_id, &order.id).await {
                Ok(Some(stock)) => {
                    payloads.push(stock.payload.clone());
                    reserved_ids.push(stock.id);
                }
                Ok(None) => {
                    self.release_all(&reserved_ids).await;
                    return Err(ServiceError::Business(format!(
                        "Out of stock for product {}",
                        item.product_id
                    )));
                }
                Err(e) => {
                    self.release_all(&reserved_ids).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self
            .store_and_mark(order, item, &product, &payloads, reserved_ids.first().cloned())
            .await
        {
            self.release_all(&reserved_ids).await;
            return Err(e);
        }
        Ok(())
    }

    async fn release_all(&self, reserved_ids: &[String]) {
        for stock_id in reserved_ids {
            if let Err(e) = self.inventory.release_reservation(stock_id).await {
                tracing::error!(stock_id = %stock_id, "Failed to release reservation: {e}");
            }
        }
    }

    // ==================== Marketplace 路径 ====================

    /// 下市场预订单（无预订单时）。external_id = 订单 ID，市场侧去重。
    async fn reserve_on_marketplace(&self, order: &Order) -> ServiceResult<()> {
        if let Some(reservation_id) = &order.reservation_id {
            // 重投递的 reserve 任务：预订单已存在，返回既有结果
            tracing::debug!(
                order_id = %order.id,
                reservation_id = %reservation_id,
                "Reservation already placed, skipping"
            );
            return Ok(());
        }

        let lines = self.marketplace_lines(&order.id).await?;
        let placed = match self.marketplace.place_order(&lines, &order.id).await {
            Ok(placed) => placed,
            Err(ServiceError::DuplicateExternalId(_)) => {
                // 上次执行已下单但落库前崩溃：检索认领
                let found = self.marketplace.search_orders(&order.id).await?;
                found.into_iter().next().ok_or_else(|| {
                    ServiceError::Business(format!(
                        "Marketplace reports external id {} used but search found nothing",
                        order.id
                    ))
                })?
            }
            Err(e) => return Err(e),
        };

        self.orders
            .set_reservation_id(&order.id, &placed.order_id)
            .await
            .map_err(map_repo_err)?;
        tracing::info!(
            order_id = %order.id,
            reservation_id = %placed.order_id,
            status = %placed.status,
            "Marketplace reservation placed"
        );
        self.bus.publish_status(
            &order.id,
            order.status,
            Some(serde_json::json!({ "reservation_id": placed.order_id })),
        );
        Ok(())
    }

    /// 聚合订单条目为市场下单行（同商品合并数量，一次调用覆盖全部）
    async fn marketplace_lines(&self, order_id: &str) -> ServiceResult<Vec<ProductLine>> {
        let items = self
            .orders
            .items_by_order(order_id)
            .await
            .map_err(map_repo_err)?;
        let mut lines: Vec<ProductLine> = Vec::new();
        for item in &items {
            let product = self
                .products
                .get(&item.product_id)
                .await
                .map_err(map_repo_err)?;
            let marketplace_id = product.marketplace_product_id.ok_or_else(|| {
                ServiceError::Business(format!(
                    "Product {} has no marketplace mapping",
                    product.id
                ))
            })?;
            match lines.iter_mut().find(|l| l.product_id == marketplace_id) {
                Some(line) => line.quantity += item.quantity,
                None => lines.push(ProductLine {
                    product_id: marketplace_id,
                    quantity: item.quantity,
                }),
            }
        }
        if lines.is_empty() {
            return Err(ServiceError::Business(format!(
                "Order {order_id} has no items to reserve"
            )));
        }
        Ok(lines)
    }

    /// 市场状态通知（marketplace-webhook 任务入口）。
    ///
    /// completed 不在这里拉密钥，只入队 fetch-keys —— 密钥拉取
    /// 有自己的重试预算和死信，不占用 webhook 任务的。
    pub async fn apply_marketplace_status(
        &self,
        order_id: &str,
        reservation_id: &str,
        status: &str,
    ) -> ServiceResult<()> {
        use crate::orders::{Effect, OrderEvent, transition};

        let event = match status {
            "processing" => OrderEvent::MarketplaceReserved,
            "completed" => OrderEvent::MarketplaceDelivered,
            // refunded 对本系统即取消：密钥不会交付了
            "canceled" | "refunded" => OrderEvent::MarketplaceCanceled,
            other => {
                return Err(ServiceError::Business(format!(
                    "Unknown marketplace status: {other}"
                )));
            }
        };

        let order = self.orders.get(order_id).await.map_err(map_repo_err)?;
        let t = transition(order.status, event);

        if t.effects.is_empty() {
            if t.changed_from(order.status) {
                self.orders
                    .set_status(order_id, t.next)
                    .await
                    .map_err(map_repo_err)?;
                self.bus.publish_status(order_id, t.next, None);
            }
            return Ok(());
        }

        for effect in &t.effects {
            match effect {
                Effect::CompleteDelivery => {
                    // 最终状态由 fetch-keys 任务在全部条目交付后写入
                    self.dispatcher
                        .enqueue(&JobKind::FetchKeys {
                            marketplace_order_id: reservation_id.to_string(),
                            order_id: order_id.to_string(),
                        })
                        .await
                        .map_err(|e| ServiceError::Transient(e.to_string()))?;
                }
                Effect::BroadcastCancellation => {
                    self.orders
                        .set_status(order_id, OrderStatus::Failed)
                        .await
                        .map_err(map_repo_err)?;
                    self.bus.publish_status(
                        order_id,
                        OrderStatus::Failed,
                        Some(serde_json::json!({ "reason": "marketplace_canceled" })),
                    );
                    tracing::warn!(
                        order_id = %order_id,
                        reservation_id = %reservation_id,
                        "Marketplace canceled the reservation"
                    );
                }
                Effect::EnqueueReserve => {
                    // 市场事件不会产生该副作用
                }
            }
        }
        Ok(())
    }

    /// 市场已交付（fetch-keys 任务入口）：一次拉取全部密钥，
    /// 按市场商品 ID 先到先得匹配条目
    pub async fn deliver_marketplace_keys(
        &self,
        order_id: &str,
        marketplace_order_id: &str,
    ) -> ServiceResult<()> {
        let order = self.orders.get(order_id).await.map_err(map_repo_err)?;
        if order.status == OrderStatus::Fulfilled {
            return Ok(());
        }

        let delivered = self.marketplace.get_keys(marketplace_order_id).await?;
        let mut pool: Vec<Option<MarketplaceKey>> = delivered.into_iter().map(Some).collect();

        let items = self
            .orders
            .items_by_order(order_id)
            .await
            .map_err(map_repo_err)?;
        for item in items.iter().filter(|i| !i.is_delivered()) {
            let product = self
                .products
                .get(&item.product_id)
                .await
                .map_err(map_repo_err)?;
            let marketplace_id = product.marketplace_product_id.clone().ok_or_else(|| {
                ServiceError::Business(format!(
                    "Product {} has no marketplace mapping",
                    product.id
                ))
            })?;

            let mut payloads: Vec<String> = Vec::new();
            for _ in 0..item.quantity.max(1) {
                // 先到先得：取走一条未被占用的同商品密钥
                let slot = pool.iter_mut().find(|slot| {
                    slot.as_ref()
                        .is_some_and(|k| k.product_id == marketplace_id)
                });
                match slot.and_then(|s| s.take()) {
                    Some(key) => payloads.push(key.serial),
                    None => {
                        return Err(ServiceError::Business(format!(
                            "Marketplace delivered fewer keys than ordered for product {marketplace_id}"
                        )));
                    }
                }
            }

            self.store_and_mark(&order, item, &product, &payloads, None)
                .await?;
        }

        self.finalize_delivery(order_id).await
    }

    // ==================== 共通：入库 / 收尾 / 恢复 ====================

    /// 信封编码 → 对象存储 → 签名链接 → Key 留痕 → 条目标记
    async fn store_and_mark(
        &self,
        order: &Order,
        item: &OrderItem,
        product: &Product,
        payloads: &[String],
        stock_item_id: Option<String>,
    ) -> ServiceResult<()> {
        let envelope = envelope::encode(product.delivery_type, &product.name, payloads);
        let content = serde_json::to_vec(&envelope)
            .map_err(|e| ServiceError::Business(format!("Envelope encoding failed: {e}")))?;

        let object_ref = self
            .storage
            .upload_raw(&order.id, &item.id, &content, "application/json")
            .await?;
        let signed_url = self.storage.signed_url(&object_ref, self.url_ttl_secs).await?;

        // 重投递时 Key 留痕已存在，不重复创建
        if self
            .keys
            .find_by_item(&item.id)
            .await
            .map_err(map_repo_err)?
            .is_none()
        {
            self.keys
                .create(&Key {
                    id: new_id(),
                    order_item_id: item.id.clone(),
                    order_id: order.id.clone(),
                    object_ref,
                    viewed_at: None,
                    download_count: 0,
                    last_ip: None,
                    last_user_agent: None,
                    created_at: now_millis(),
                })
                .await
                .map_err(map_repo_err)?;
        }

        self.orders
            .mark_item_delivered(&item.id, &signed_url, stock_item_id.as_deref())
            .await
            .map_err(map_repo_err)?;
        tracing::info!(order_id = %order.id, item_id = %item.id, "Item delivered");
        Ok(())
    }

    /// 全部条目有签名链接后推进 fulfilled、发完成邮件、推送状态
    ///
    /// 条目未齐时静默返回（市场分批交付的中间态）。
    async fn finalize_delivery(&self, order_id: &str) -> ServiceResult<()> {
        let items = self
            .orders
            .items_by_order(order_id)
            .await
            .map_err(map_repo_err)?;
        if items.iter().any(|i| !i.is_delivered()) {
            tracing::debug!(order_id = %order_id, "Delivery incomplete, not finalizing");
            return Ok(());
        }

        let order = self.orders.get(order_id).await.map_err(map_repo_err)?;
        if order.status != OrderStatus::Fulfilled {
            self.orders
                .set_status(order_id, OrderStatus::Fulfilled)
                .await
                .map_err(map_repo_err)?;
            self.bus.publish_status(
                order_id,
                OrderStatus::Fulfilled,
                Some(serde_json::json!({ "items": items.len() })),
            );
            tracing::info!(order_id = %order_id, "Order fulfilled");
        }

        // flag 先翻转再发信；重投递/恢复路径拿到 false 直接跳过
        if self
            .orders
            .try_mark_email_sent(order_id)
            .await
            .map_err(map_repo_err)?
        {
            let summary = self.completion_summary(&order, &items).await?;
            if let Err(e) = self
                .notifier
                .send_order_completed(&order.customer_email, &summary)
                .await
            {
                // flag 已翻转，邮件丢失可由管理端手工补发
                tracing::error!(order_id = %order_id, "Completion email failed: {e}");
            }
        }
        Ok(())
    }

    async fn completion_summary(
        &self,
        order: &Order,
        items: &[OrderItem],
    ) -> ServiceResult<OrderCompletedSummary> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product = self
                .products
                .get(&item.product_id)
                .await
                .map_err(map_repo_err)?;
            lines.push((
                product.name,
                item.signed_url.clone().unwrap_or_default(),
            ));
        }
        Ok(OrderCompletedSummary {
            order_id: order.id.clone(),
            items: lines,
            total: format!("{} {}", order.total, order.currency),
        })
    }

    /// 市场单方取消（order-canceled 任务入口，按预订单 ID 反查）
    pub async fn cancel_by_reservation(&self, reservation_id: &str) -> ServiceResult<()> {
        let order = self
            .orders
            .find_by_reservation_id(reservation_id)
            .await
            .map_err(map_repo_err)?
            .ok_or_else(|| {
                ServiceError::Business(format!(
                    "No order holds reservation {reservation_id}"
                ))
            })?;
        self.apply_marketplace_status(&order.id, reservation_id, "canceled")
            .await
    }

    /// 恢复：密钥已入库但订单未推进（存储写入和状态更新之间崩溃）
    ///
    /// 检查每个未交付条目的预期对象；存在则重签链接并补 Key 留痕，
    /// 全部补齐后推进 fulfilled —— 不重新下市场预订单。
    pub async fn recover_order(&self, order_id: &str) -> ServiceResult<()> {
        let order = self.orders.get(order_id).await.map_err(map_repo_err)?;
        if order.status == OrderStatus::Fulfilled {
            return Ok(());
        }

        let items = self
            .orders
            .items_by_order(order_id)
            .await
            .map_err(map_repo_err)?;
        for item in items.iter().filter(|i| !i.is_delivered()) {
            let object_ref = format!("{order_id}/{}", item.id);
            if !self.storage.exists(&object_ref).await? {
                return Err(ServiceError::Business(format!(
                    "Item {} has no stored secret, cannot recover",
                    item.id
                )));
            }
            let signed_url = self.storage.signed_url(&object_ref, self.url_ttl_secs).await?;
            self.orders
                .refresh_item_url(&item.id, &signed_url)
                .await
                .map_err(map_repo_err)?;
            if self
                .keys
                .find_by_item(&item.id)
                .await
                .map_err(map_repo_err)?
                .is_none()
            {
                self.keys
                    .create(&Key {
                        id: new_id(),
                        order_item_id: item.id.clone(),
                        order_id: order_id.to_string(),
                        object_ref,
                        viewed_at: None,
                        download_count: 0,
                        last_ip: None,
                        last_user_agent: None,
                        created_at: now_millis(),
                    })
                    .await
                    .map_err(map_repo_err)?;
            }
            tracing::info!(order_id = %order_id, item_id = %item.id, "Recovered stored secret");
        }

        self.finalize_delivery(order_id).await
    }
}
