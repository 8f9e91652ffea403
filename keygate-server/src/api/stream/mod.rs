//! 状态推送 WebSocket
//!
//! `GET /api/stream?token=...&order_id=...` 或 `?token=...&scope=admin`。
//! 浏览器 WebSocket API 不能带自定义头，令牌走查询参数。
//! 推送是 best-effort：掉线不重投，权威数据在轮询读路径。

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/stream", get(handler::stream))
}
