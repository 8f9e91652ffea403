//! 外部协作方
//!
//! 编排器只依赖这里的 trait；HTTP / 文件系统实现在各自子模块。
//! 错误分两类：Transient（超时、连接重置、5xx）可重试，
//! Business（4xx、数据不满足前置条件）不可重试 —— 任务调度层
//! 据此决定退避重试还是直接入死信。

pub mod inventory;
pub mod marketplace;
pub mod notification;
pub mod storage;

pub use inventory::{InventoryService, StockInventory};
pub use marketplace::{
    HttpMarketplace, MarketplaceApi, MarketplaceKey, MarketplaceOrder, ProductLine,
};
pub use notification::{HttpNotifier, Notifier, OrderCompletedSummary};
pub use storage::{FsVault, StorageClient};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// 基础设施瞬时故障，重试有意义
    #[error("Transient failure: {0}")]
    Transient(String),

    /// 业务性失败，重试注定无效
    #[error("{0}")]
    Business(String),

    /// 市场报告 external_id 已被使用（编排器改走认领路径）
    #[error("External id already used: {0}")]
    DuplicateExternalId(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        // 超时与连接层故障可重试；带状态码的看档位
        if err.is_timeout() || err.is_connect() {
            return ServiceError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() => ServiceError::Transient(err.to_string()),
            Some(_) => ServiceError::Business(err.to_string()),
            None => ServiceError::Transient(err.to_string()),
        }
    }
}
