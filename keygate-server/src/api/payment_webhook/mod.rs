//! 支付 IPN 入口
//!
//! 公开路由；鉴权靠 `X-Ipn-Signature` 头（排序 JSON 的 HMAC-SHA512）。
//! 无论内部结果如何都回 200 —— 对端在任何非 2xx 上重试，
//! 真实结果放在响应体的 `processed` 字段里。

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/webhooks/payment", post(handler::receive))
}
