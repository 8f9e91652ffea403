//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`payment_webhook`] - 支付处理方 IPN（公开，签名鉴权，恒 200）
//! - [`marketplace_webhook`] - 市场通知（公开，签名鉴权，恒 200）
//! - [`orders`] - 下单与订单查询
//! - [`download`] - 签名链接密钥下载
//! - [`stream`] - 订单状态 WebSocket 推送
//! - [`jobs`] - 死信管理（管理端）
//! - [`webhook_log`] - webhook 流水审计（管理端）

pub mod download;
pub mod health;
pub mod jobs;
pub mod marketplace_webhook;
pub mod orders;
pub mod payment_webhook;
pub mod stream;
pub mod webhook_log;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::core::ServerState;

// Re-export common types for handlers
pub use crate::utils::{AppResponse, AppResult};

pub fn router(state: ServerState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(payment_webhook::router())
        .merge(marketplace_webhook::router())
        .merge(orders::router())
        .merge(download::router())
        .merge(stream::router())
        .merge(jobs::router())
        .merge(webhook_log::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
