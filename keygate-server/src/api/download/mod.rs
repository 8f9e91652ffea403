//! 签名链接下载
//!
//! 公开路由，鉴权完全在 URL 里：`exp`（过期时间戳）+ `sig`
//! （HMAC-SHA256）。签名或有效期任一不对即 403，不区分原因。
//! 每次成功下载都在 key_record 上盖访问戳。

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/download/{order_id}/{item_id}", get(handler::download))
}
