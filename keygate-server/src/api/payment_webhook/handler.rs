//! Payment IPN Handler
//!
//! 处理链：签名校验 → 流水登记（唯一索引去重） → 支付落库 →
//! 状态机推进 → 任务入队 → 状态推送 → 流水置 processed。
//! 副作用失败时流水保持 processed=false，对端重投递会重新尝试 ——
//! 每个副作用自身幂等。

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::ServerState;
use crate::db::repository::Receipt;
use crate::jobs::JobKind;
use crate::orders::OrderEvent;
use crate::utils::signature;
use shared::models::{Payment, PaymentStatus, WebhookSource};
use shared::util::{new_id, now_millis};

const SIGNATURE_HEADER: &str = "x-ipn-signature";

/// 处理方 IPN 载荷
#[derive(Debug, Deserialize)]
struct PaymentIpn {
    /// 处理方分配的支付 ID（数字或字符串都有出现）
    payment_id: Value,
    order_id: String,
    payment_status: String,
    price_amount: Decimal,
    price_currency: String,
    #[serde(default)]
    pay_amount: f64,
    #[serde(default)]
    pay_currency: String,
    #[serde(default)]
    confirmations: i32,
    #[serde(default)]
    provider: Option<String>,
}

impl PaymentIpn {
    fn external_id(&self) -> String {
        match &self.payment_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn parse_status(raw: &str) -> Option<(PaymentStatus, OrderEvent)> {
    match raw {
        "created" => Some((PaymentStatus::Created, OrderEvent::PaymentCreated)),
        "waiting" => Some((PaymentStatus::Waiting, OrderEvent::PaymentWaiting)),
        "confirming" => Some((PaymentStatus::Confirming, OrderEvent::PaymentConfirming)),
        // confirmed 仍在等待足额确认，对订单而言同 confirming；
        // 支付行照原词落库
        "confirmed" => Some((PaymentStatus::Confirmed, OrderEvent::PaymentConfirming)),
        "finished" => Some((PaymentStatus::Finished, OrderEvent::PaymentFinished)),
        "underpaid" => Some((PaymentStatus::Underpaid, OrderEvent::PaymentUnderpaid)),
        "failed" | "expired" => Some((PaymentStatus::Failed, OrderEvent::PaymentFailed)),
        _ => None,
    }
}

fn reply(processed: bool, detail: Value) -> Json<Value> {
    Json(json!({ "processed": processed, "detail": detail }))
}

/// POST /webhooks/payment — 恒 200
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
    let sig_valid = signature::verify_sorted_sha512(&body, &sig, &state.config.ipn_secret);
    let raw = String::from_utf8_lossy(&body).to_string();

    let ipn: PaymentIpn = match serde_json::from_slice(&body) {
        Ok(ipn) => ipn,
        Err(e) => {
            tracing::warn!("Unparseable payment IPN: {e}");
            return reply(false, json!({ "reason": "unparseable_body" }));
        }
    };
    let external_id = ipn.external_id();
    let status_tag = ipn.payment_status.clone();

    // 先留痕（签名无效也留，processed 永远 false）
    let receipt = match state
        .webhook_log
        .record_receipt(
            &external_id,
            WebhookSource::Payment,
            &status_tag,
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
                    external_id = %external_id,
                    status = %status_tag,
                    "Duplicate payment notification, already processed"
                );
                return reply(false, json!({ "duplicate": true }));
            }
            // 上次处理中途失败的重投递：副作用幂等，重新执行
            entry
        }
    };

    if !sig_valid {
        tracing::warn!(
            external_id = %external_id,
            status = %status_tag,
            "Payment IPN signature verification failed"
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

    let Some((payment_status, event)) = parse_status(&status_tag) else {
        tracing::warn!(status = %status_tag, "Unknown payment status");
        return reply(false, json!({ "reason": "unknown_status" }));
    };

    let raw_value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    match apply(&state, &ipn, raw_value, &external_id, payment_status, event).await {
        Ok(result) => {
            if let Err(e) = state
                .webhook_log
                .mark_processed(&entry.id, Some(&ipn.order_id), result.clone())
                .await
            {
                tracing::error!("Failed to mark webhook processed: {e}");
            }
            reply(true, result)
        }
        Err(e) => {
            tracing::error!(
                external_id = %external_id,
                order_id = %ipn.order_id,
                "Payment IPN processing failed: {e}"
            );
            reply(false, json!({ "reason": "processing_failed" }))
        }
    }
}

/// 副作用本体：支付落库、状态机推进、任务入队、推送
async fn apply(
    state: &ServerState,
    ipn: &PaymentIpn,
    raw_payload: Value,
    external_id: &str,
    payment_status: PaymentStatus,
    event: OrderEvent,
) -> Result<Value, crate::utils::AppError> {
    let payment = Payment {
        id: new_id(),
        external_id: external_id.to_string(),
        order_id: ipn.order_id.clone(),
        provider: ipn.provider.clone().unwrap_or_else(|| "default".into()),
        status: payment_status,
        amount_fiat: ipn.price_amount,
        currency_fiat: ipn.price_currency.clone(),
        amount_crypto: ipn.pay_amount,
        currency_crypto: ipn.pay_currency.clone(),
        confirmations: ipn.confirmations,
        raw_payload,
        created_at: now_millis(),
        updated_at: now_millis(),
    };
    state.payments.upsert_from_ipn(&payment).await?;

    let Some(order) = state.orders.find_by_id(&ipn.order_id).await? else {
        tracing::warn!(order_id = %ipn.order_id, "Payment IPN references unknown order");
        return Ok(json!({ "order_found": false }));
    };

    let t = crate::orders::transition(order.status, event);
    if t.changed_from(order.status) {
        state.orders.set_status(&order.id, t.next).await?;
        state.bus.publish_status(&order.id, t.next, None);
    }

    let mut job_id = None;
    for effect in &t.effects {
        if let crate::orders::Effect::EnqueueReserve = effect {
            let id = state
                .dispatcher
                .enqueue(&JobKind::Reserve {
                    order_id: order.id.clone(),
                })
                .await?;
            job_id = Some(id);
        }
    }

    Ok(json!({
        "order_found": true,
        "status": t.next.to_string(),
        "job_id": job_id,
    }))
}
