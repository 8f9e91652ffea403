//! 任务执行器
//!
//! worker 与业务逻辑之间的缝：调度/重试逻辑只认这个 trait。

use async_trait::async_trait;

use super::{JobError, JobKind};
use crate::fulfillment::Orchestrator;

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, kind: &JobKind) -> Result<(), JobError>;
}

#[async_trait]
impl JobExecutor for Orchestrator {
    async fn execute(&self, kind: &JobKind) -> Result<(), JobError> {
        match kind {
            JobKind::Reserve { order_id } => self.fulfill_order(order_id).await?,
            JobKind::FetchKeys {
                marketplace_order_id,
                order_id,
            } => {
                self.deliver_marketplace_keys(order_id, marketplace_order_id)
                    .await?
            }
            JobKind::MarketplaceWebhook {
                order_id,
                reservation_id,
                status,
            } => {
                self.apply_marketplace_status(order_id, reservation_id, status)
                    .await?
            }
            JobKind::OrderCanceled { reservation_id } => {
                self.cancel_by_reservation(reservation_id).await?
            }
        }
        Ok(())
    }
}
