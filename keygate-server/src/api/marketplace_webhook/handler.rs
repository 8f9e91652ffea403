//! Marketplace Notification Handler
//!
//! 通知体里的 `order_id` 是市场侧预订单 ID（我们的 reservation_id）。
//! 这里只做三件事：签名校验、流水登记、入队 —— 推进状态的工作
//! 全部交给任务处理器，失败能退避重试。

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::ServerState;
use crate::db::repository::Receipt;
use crate::jobs::JobKind;
use crate::utils::signature;
use shared::models::WebhookSource;

const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Deserialize)]
struct MarketplaceNotice {
    /// 市场侧预订单 ID
    order_id: String,
    /// processing | completed | canceled | refunded
    status: String,
}

fn reply(processed: bool, detail: Value) -> Json<Value> {
    Json(json!({ "processed": processed, "detail": detail }))
}

/// POST /webhooks/marketplace — 恒 200
pub async fn receive(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let sig = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let sig_valid =
        signature::verify_raw_sha256(&body, &sig, &state.config.marketplace_webhook_secret);
    let raw = String::from_utf8_lossy(&body).to_string();

    let notice: MarketplaceNotice = match serde_json::from_slice(&body) {
        Ok(notice) => notice,
        Err(e) => {
            tracing::warn!("Unparseable marketplace notification: {e}");
            return reply(false, json!({ "reason": "unparseable_body" }));
        }
    };

    let receipt = match state
        .webhook_log
        .record_receipt(
            &notice.order_id,
            WebhookSource::Marketplace,
            &notice.status,
            &raw,
            &sig,
            sig_valid,
        )
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::error!("Webhook ledger write failed: {e}");
            return reply(false, json!({ "reason": "ledger_unavailable" }));
        }
    };

    let entry = match receipt {
        Receipt::Fresh(entry) => entry,
        Receipt::Duplicate(entry) => {
            if entry.processed {
                tracing::debug!(
                    reservation_id = %notice.order_id,
                    status = %notice.status,
                    "Duplicate marketplace notification, already processed"
                );
                return reply(false, json!({ "duplicate": true }));
            }
            entry
        }
    };

    if !sig_valid {
        tracing::warn!(
            reservation_id = %notice.order_id,
            "Marketplace notification signature verification failed"
        );
        if let Err(e) = state
            .webhook_log
            .mark_rejected(&entry.id, "invalid_signature")
            .await
        {
            tracing::error!("Failed to record signature rejection: {e}");
        }
        return reply(false, json!({ "reason": "invalid_signature" }));
    }

    match enqueue_for(&state, &notice).await {
        Ok((order_id, result)) => {
            if let Err(e) = state
                .webhook_log
                .mark_processed(&entry.id, order_id.as_deref(), result.clone())
                .await
            {
                tracing::error!("Failed to mark webhook processed: {e}");
            }
            reply(true, result)
        }
        Err(e) => {
            tracing::error!(
                reservation_id = %notice.order_id,
                status = %notice.status,
                "Marketplace notification processing failed: {e}"
            );
            reply(false, json!({ "reason": "processing_failed" }))
        }
    }
}

/// 把通知转成任务。取消/退款不需要预先反查订单
/// （任务处理器按 reservation_id 自己解析，订单缺失时才算业务失败）。
async fn enqueue_for(
    state: &ServerState,
    notice: &MarketplaceNotice,
) -> Result<(Option<String>, Value), crate::utils::AppError> {
    match notice.status.as_str() {
        "canceled" | "refunded" => {
            let job_id = state
                .dispatcher
                .enqueue(&JobKind::OrderCanceled {
                    reservation_id: notice.order_id.clone(),
                })
                .await?;
            Ok((None, json!({ "job_id": job_id })))
        }
        _ => {
            let Some(order) = state.orders.find_by_reservation_id(&notice.order_id).await? else {
                tracing::warn!(
                    reservation_id = %notice.order_id,
                    "Marketplace notification references unknown reservation"
                );
                return Ok((None, json!({ "order_found": false })));
            };
            let job_id = state
                .dispatcher
                .enqueue(&JobKind::MarketplaceWebhook {
                    order_id: order.id.clone(),
                    reservation_id: notice.order_id.clone(),
                    status: notice.status.clone(),
                })
                .await?;
            Ok((Some(order.id), json!({ "order_found": true, "job_id": job_id })))
        }
    }
}
