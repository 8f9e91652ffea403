use axum::{
    Json,
    extract::{Path, State},
};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::api::{AppResponse, AppResult};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::services::ServiceError;
use crate::utils::{AppError, ok};
use shared::models::{Order, OrderCreate, OrderDetail, OrderItem, OrderStatus};
use shared::util::{new_id, now_millis};

/// POST /api/orders — 下单（公开）
///
/// 单价和总额由服务端按商品当前价格计算，客户端提交的只有
/// 商品 ID 和数量。订单以 `created` 状态落库，等支付通知推进。
pub async fn create(
    State(state): State<ServerState>,
    Json(request): Json<OrderCreate>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    if request.items.is_empty() {
        return Err(AppError::Validation("Order must contain at least one item".into()));
    }
    if !request.customer_email.contains('@') {
        return Err(AppError::Validation("Invalid customer email".into()));
    }
    if request.items.iter().any(|i| i.quantity == 0) {
        return Err(AppError::Validation("Item quantity must be at least 1".into()));
    }

    let order_id = new_id();
    let mut items = Vec::with_capacity(request.items.len());
    let mut total = Decimal::ZERO;
    for line in &request.items {
        let product = state.products.get(&line.product_id).await?;
        if !product.active {
            return Err(AppError::Validation(format!(
                "Product {} is not available",
                product.name
            )));
        }
        if request.source == shared::models::OrderSource::Marketplace
            && product.marketplace_product_id.is_none()
        {
            return Err(AppError::Validation(format!(
                "Product {} has no marketplace listing",
                product.name
            )));
        }
        total += product.price * Decimal::from(line.quantity);
        items.push(OrderItem {
            id: new_id(),
            order_id: order_id.clone(),
            product_id: product.id,
            quantity: line.quantity,
            unit_price: product.price,
            signed_url: None,
            stock_item_id: None,
            delivered_at: None,
        });
    }

    let order = Order {
        id: order_id,
        customer_email: request.customer_email.trim().to_lowercase(),
        status: OrderStatus::Created,
        source: request.source,
        total,
        currency: request.currency,
        reservation_id: None,
        completion_email_sent: false,
        created_at: now_millis(),
        updated_at: now_millis(),
    };
    state.orders.create_with_items(&order, &items).await?;

    tracing::info!(
        order_id = %order.id,
        source = ?order.source,
        items = items.len(),
        "Order created"
    );
    Ok(ok(OrderDetail { order, items }))
}

/// GET /api/orders/{order_id} — 订单详情（归属校验）
pub async fn detail(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    let detail = state.orders.detail(&order_id).await?;
    if !user.owns_order(&detail.order.customer_email) {
        return Err(AppError::forbidden("Order belongs to another customer"));
    }
    Ok(ok(detail))
}

/// GET /api/orders/{order_id}/status — 轮询用的轻量状态读
pub async fn status(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> AppResult<Json<AppResponse<Value>>> {
    let order = state.orders.get(&order_id).await?;
    if !user.owns_order(&order.customer_email) {
        return Err(AppError::forbidden("Order belongs to another customer"));
    }
    Ok(ok(json!({
        "status": order.status,
        "updated_at": order.updated_at,
    })))
}

/// POST /api/orders/{order_id}/recover — 管理端重建交付产物
pub async fn recover(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    if !user.is_admin() {
        return Err(AppError::forbidden("Recovery requires admin role"));
    }
    state
        .orchestrator
        .recover_order(&order_id)
        .await
        .map_err(map_service_err)?;
    Ok(ok(state.orders.detail(&order_id).await?))
}

fn map_service_err(e: ServiceError) -> AppError {
    match e {
        ServiceError::Business(msg) => AppError::BusinessRule(msg),
        ServiceError::DuplicateExternalId(msg) => AppError::Conflict(msg),
        ServiceError::Transient(msg) => AppError::Internal(msg),
    }
}
