//! Webhook 流水审计（管理端）
//!
//! 每条入站通知（含签名无效、重复投递）都有留痕，
//! 排障时按订单串起完整的通知时间线。

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/webhooks/log", get(handler::list))
}
