use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::api::{AppResponse, AppResult};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::{AppError, ok};
use shared::models::WebhookLogEntry;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    order_id: String,
}

/// GET /api/webhooks/log?order_id= — 某订单的通知时间线
pub async fn list(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<LogQuery>,
) -> AppResult<Json<AppResponse<Vec<WebhookLogEntry>>>> {
    if !user.is_admin() {
        return Err(AppError::forbidden("Webhook audit requires admin role"));
    }
    Ok(ok(state.webhook_log.list_by_order(&query.order_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use shared::models::WebhookSource;
    use tower::ServiceExt;

    async fn test_state() -> (ServerState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_overrides(dir.path().to_str().unwrap().to_string(), 0);
        let (state, _job_rx) = ServerState::initialize_in_memory(config).await.unwrap();
        (state, dir)
    }

    async fn send(state: &ServerState, request: Request<Body>) -> (StatusCode, Value) {
        let response = crate::api::router(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_timeline_by_order_admin_only() {
        let (state, _dir) = test_state().await;

        // 两条已归属 order-1 的流水，一条其它订单的
        for (eid, tag) in [("pay-1", "waiting"), ("pay-1", "finished")] {
            let receipt = state
                .webhook_log
                .record_receipt(eid, WebhookSource::Payment, tag, "{}", "sig", true)
                .await
                .unwrap();
            if let crate::db::repository::Receipt::Fresh(entry) = receipt {
                state
                    .webhook_log
                    .mark_processed(&entry.id, Some("order-1"), serde_json::json!({}))
                    .await
                    .unwrap();
            }
        }
        state
            .webhook_log
            .record_receipt("pay-2", WebhookSource::Payment, "finished", "{}", "s", true)
            .await
            .unwrap();

        let admin = state
            .jwt_service
            .generate_token("u1", "ops@example.com", "admin")
            .unwrap();
        let (status, reply) = send(
            &state,
            Request::get("/api/webhooks/log?order_id=order-1")
                .header("authorization", format!("Bearer {admin}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["data"].as_array().unwrap().len(), 2);

        let customer = state
            .jwt_service
            .generate_token("u2", "alice@example.com", "customer")
            .unwrap();
        let (status, _) = send(
            &state,
            Request::get("/api/webhooks/log?order_id=order-1")
                .header("authorization", format!("Bearer {customer}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
