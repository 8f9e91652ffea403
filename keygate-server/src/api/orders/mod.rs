//! 订单路由
//!
//! 下单是公开接口（顾客付款前还没有账号）；查询接口要求 JWT，
//! 顾客只能看自己邮箱名下的订单，管理员全量放行。

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/orders", post(handler::create))
        .route("/api/orders/{order_id}", get(handler::detail))
        .route("/api/orders/{order_id}/status", get(handler::status))
        .route("/api/orders/{order_id}/recover", post(handler::recover))
}
