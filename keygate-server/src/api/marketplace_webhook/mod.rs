//! 市场通知入口
//!
//! 公开路由；鉴权靠 `X-Signature` 头（原始请求体的 HMAC-SHA256）。
//! 与支付 IPN 同一套恒 200 契约。通知本身只负责登记 + 入队，
//! 真正的状态推进在任务处理器里（带重试保障）。

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/webhooks/marketplace", post(handler::receive))
}
