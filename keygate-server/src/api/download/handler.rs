use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::core::ServerState;
use crate::services::storage::StorageClient;
use crate::utils::{AppError, AppResult};
use shared::util::now_millis;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    exp: i64,
    sig: String,
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

/// GET /download/{order_id}/{item_id}?exp=&sig=
pub async fn download(
    State(state): State<ServerState>,
    Path((order_id, item_id)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let object_ref = format!("{order_id}/{item_id}");
    if !state.storage.verify_url(&object_ref, query.exp, &query.sig) {
        tracing::warn!(object_ref = %object_ref, "Rejected download with bad or expired signature");
        return Err(AppError::forbidden("Link is invalid or expired"));
    }

    let content = state
        .storage
        .fetch(&object_ref)
        .await
        .map_err(|_| AppError::not_found("Delivery package not found"))?;

    // 访问留痕尽力而为，失败不挡下载
    match state.keys.find_by_item(&item_id).await {
        Ok(Some(key)) => {
            let user_agent = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            if let Err(e) = state
                .keys
                .record_access(&key.id, &client_ip(&headers), user_agent, now_millis())
                .await
            {
                tracing::error!(key_id = %key.id, "Failed to stamp key access: {e}");
            }
        }
        Ok(None) => {
            tracing::warn!(item_id = %item_id, "Download served without a key record");
        }
        Err(e) => {
            tracing::error!(item_id = %item_id, "Key record lookup failed: {e}");
        }
    }

    tracing::info!(object_ref = %object_ref, "Delivery package downloaded");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        content,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, ServerState};
    use crate::services::StorageClient;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use shared::models::Key;
    use shared::util::new_id;
    use tower::ServiceExt;

    async fn test_state() -> (ServerState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_overrides(dir.path().to_str().unwrap().to_string(), 0);
        let (state, _job_rx) = ServerState::initialize_in_memory(config).await.unwrap();
        (state, dir)
    }

    /// 上传一份密文并返回签名 URL 的 path+query 部分
    async fn stage_package(state: &ServerState, order_id: &str, item_id: &str) -> String {
        let object_ref = state
            .storage
            .upload_raw(order_id, item_id, br#"{"content":["SERIAL-1"]}"#, "application/json")
            .await
            .unwrap();
        let url = state
            .storage
            .signed_url(&object_ref, state.config.signed_url_ttl_secs)
            .await
            .unwrap();
        let base = &state.config.public_base_url;
        url.strip_prefix(base.trim_end_matches('/')).unwrap().to_string()
    }

    async fn get_raw(state: &ServerState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = crate::api::router(state.clone())
            .oneshot(
                Request::get(uri)
                    .header("user-agent", "test-agent")
                    .header("x-forwarded-for", "9.8.7.6")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_valid_link_serves_package_and_stamps_access() {
        let (state, _dir) = test_state().await;
        let item_id = new_id();
        let uri = stage_package(&state, "order-1", &item_id).await;

        let key = Key {
            id: new_id(),
            order_item_id: item_id.clone(),
            order_id: "order-1".into(),
            object_ref: format!("order-1/{item_id}"),
            viewed_at: None,
            download_count: 0,
            last_ip: None,
            last_user_agent: None,
            created_at: now_millis(),
        };
        state.keys.create(&key).await.unwrap();

        let (status, body) = get_raw(&state, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"content":["SERIAL-1"]}"#);

        let stamped = state.keys.find_by_item(&item_id).await.unwrap().unwrap();
        assert_eq!(stamped.download_count, 1);
        assert!(stamped.viewed_at.is_some());
        assert_eq!(stamped.last_ip.as_deref(), Some("9.8.7.6"));
        assert_eq!(stamped.last_user_agent.as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn test_tampered_signature_is_forbidden() {
        let (state, _dir) = test_state().await;
        let item_id = new_id();
        let uri = stage_package(&state, "order-1", &item_id).await;

        // 换一个 item_id，签名对不上
        let tampered = uri.replace(&item_id, "other-item");
        let (status, _) = get_raw(&state, &tampered).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_expired_link_is_forbidden() {
        let (state, _dir) = test_state().await;
        let item_id = new_id();
        stage_package(&state, "order-1", &item_id).await;

        let uri = format!("/download/order-1/{item_id}?exp=1000&sig={}", "ab".repeat(32));
        let (status, _) = get_raw(&state, &uri).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_package_is_not_found() {
        let (state, _dir) = test_state().await;
        // 直接给一个没有对应对象的合法签名
        let url = state
            .storage
            .signed_url("order-x/item-x", 600)
            .await
            .unwrap();
        let uri = url
            .strip_prefix(state.config.public_base_url.trim_end_matches('/'))
            .unwrap()
            .to_string();
        let (status, _) = get_raw(&state, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
