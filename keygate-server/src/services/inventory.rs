//! Inventory Service
//!
//! 本地库存池（custom 路径）。reserve 返回 None 表示售罄 ——
//! 调用方视为业务性失败，不重试。

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::models::StockItem;

use super::{ServiceError, ServiceResult};
use crate::db::repository::{RepoError, StockRepository};

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// FIFO 预留一条库存；售罄返回 None
    async fn reserve_item(&self, product_id: &str, order_id: &str)
    -> ServiceResult<Option<StockItem>>;

    /// 把该订单在此商品下的全部预留结转为已售（幂等）
    async fn mark_sold(&self, product_id: &str, order_id: &str, price: Decimal)
    -> ServiceResult<()>;

    /// 交付失败回滚，条目回到可用池
    async fn release_reservation(&self, item_id: &str) -> ServiceResult<()>;
}

/// 库存仓储之上的薄封装
pub struct StockInventory {
    repo: StockRepository,
}

impl StockInventory {
    pub fn new(repo: StockRepository) -> Self {
        Self { repo }
    }
}

fn map_repo_err(err: RepoError) -> ServiceError {
    match err {
        RepoError::Database(msg) => ServiceError::Transient(msg),
        other => ServiceError::Business(other.to_string()),
    }
}

#[async_trait]
impl InventoryService for StockInventory {
    async fn reserve_item(
        &self,
        product_id: &str,
        order_id: &str,
    ) -> ServiceResult<Option<StockItem>> {
        match self.repo.reserve_next(product_id, order_id).await {
            Ok(item) => Ok(Some(item)),
            // 售罄是 Validation，不是错误路径
            Err(RepoError::Validation(_)) => Ok(None),
            Err(e) => Err(map_repo_err(e)),
        }
    }

    async fn mark_sold(
        &self,
        product_id: &str,
        order_id: &str,
        price: Decimal,
    ) -> ServiceResult<()> {
        self.repo
            .mark_sold(product_id, order_id, price)
            .await
            .map_err(map_repo_err)
    }

    async fn release_reservation(&self, item_id: &str) -> ServiceResult<()> {
        self.repo.release(item_id).await.map_err(map_repo_err)
    }
}
