use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    token: String,
    /// 订阅单个订单（顾客路径）
    order_id: Option<String>,
    /// "admin" — 订阅全部订单状态事件
    scope: Option<String>,
}

/// GET /api/stream — 升级前完成鉴权和订阅参数校验
pub async fn stream(
    State(state): State<ServerState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let claims = state
        .jwt_service()
        .validate_token(&query.token)
        .map_err(|e| {
            tracing::warn!("Stream token rejected: {e}");
            AppError::InvalidToken
        })?;
    let user = CurrentUser::from(claims);

    enum Subscription {
        Order(String),
        Admin,
    }

    let subscription = match (&query.order_id, query.scope.as_deref()) {
        (Some(order_id), None) => {
            let order = state.orders.get(order_id).await?;
            if !user.owns_order(&order.customer_email) {
                return Err(AppError::forbidden("Order belongs to another customer"));
            }
            Subscription::Order(order.id)
        }
        (None, Some("admin")) => {
            if !user.is_admin() {
                return Err(AppError::forbidden("Admin scope requires admin role"));
            }
            Subscription::Admin
        }
        _ => {
            return Err(AppError::Validation(
                "Provide either order_id or scope=admin".into(),
            ));
        }
    };

    Ok(ws.on_upgrade(move |socket| async move {
        let (conn_id, rx) = state.bus.register();
        match &subscription {
            Subscription::Order(order_id) => state.bus.subscribe_order(conn_id, order_id),
            Subscription::Admin => state.bus.subscribe_admin(conn_id),
        }
        tracing::debug!(conn_id, user = %user.email, "Stream connection opened");
        pump(socket, rx).await;
        state.bus.unregister(conn_id);
        tracing::debug!(conn_id, "Stream connection closed");
    }))
}

/// 总线消息 → 文本帧。客户端主动关闭或发送端掉线时退出。
async fn pump(
    mut socket: WebSocket,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<shared::message::BusMessage>,
) {
    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    // 客户端帧只认 Close，其余忽略（ping/pong 由 axum 处理）
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
