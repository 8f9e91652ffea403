use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::api::{AppResponse, AppResult};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::db::repository::JobRow;
use crate::utils::{AppError, ok};

fn require_admin(user: &CurrentUser) -> AppResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("Dead-letter management requires admin role"))
    }
}

/// GET /api/jobs/dead-letter — 死信清单
pub async fn dead_letter(
    State(state): State<ServerState>,
    user: CurrentUser,
) -> AppResult<Json<AppResponse<Vec<JobRow>>>> {
    require_admin(&user)?;
    Ok(ok(state.jobs.dead_letter_list().await?))
}

/// POST /api/jobs/dead-letter/{job_id}/retry — 重置计数重新入队
pub async fn retry(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(job_id): Path<String>,
) -> AppResult<Json<AppResponse<JobRow>>> {
    require_admin(&user)?;
    let row = state.dispatcher.retry_dead(&job_id).await?;
    tracing::info!(job_id = %row.id, kind = %row.kind, "Dead-letter job requeued by operator");
    Ok(ok(row))
}

/// DELETE /api/jobs/dead-letter/{job_id} — 清除死信（只对 dead 行生效）
pub async fn purge(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(job_id): Path<String>,
) -> AppResult<Json<AppResponse<Value>>> {
    require_admin(&user)?;
    state.jobs.purge_dead(&job_id).await?;
    tracing::info!(job_id = %job_id, "Dead-letter job purged by operator");
    Ok(ok(json!({ "purged": job_id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state() -> (ServerState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_overrides(dir.path().to_str().unwrap().to_string(), 0);
        let (state, _job_rx) = ServerState::initialize_in_memory(config).await.unwrap();
        (state, dir)
    }

    fn token(state: &ServerState, role: &str) -> String {
        state
            .jwt_service
            .generate_token("u1", "ops@example.com", role)
            .unwrap()
    }

    async fn seed_dead_job(state: &ServerState) -> JobRow {
        let job = JobRow::new(
            "reserve",
            serde_json::json!({ "type": "reserve", "order_id": "o1" }),
            Some("o1".into()),
            3,
        );
        state.jobs.create(&job).await.unwrap();
        state.jobs.move_dead(&job.id, "boom", "transient").await.unwrap();
        job
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
    async fn test_dead_letter_list_is_admin_only() {
        let (state, _dir) = test_state().await;
        seed_dead_job(&state).await;

        let (status, _) = send(
            &state,
            Request::get("/api/jobs/dead-letter")
                .header("authorization", format!("Bearer {}", token(&state, "customer")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, reply) = send(
            &state,
            Request::get("/api/jobs/dead-letter")
                .header("authorization", format!("Bearer {}", token(&state, "admin")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["data"].as_array().unwrap().len(), 1);
        assert_eq!(reply["data"][0]["error_kind"], "transient");
    }

    #[tokio::test]
    async fn test_retry_requeues_dead_job() {
        let (state, _dir) = test_state().await;
        let job = seed_dead_job(&state).await;

        let (status, reply) = send(
            &state,
            Request::post(format!("/api/jobs/dead-letter/{}/retry", job.id))
                .header("authorization", format!("Bearer {}", token(&state, "admin")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["data"]["status"], "queued");
        assert_eq!(reply["data"]["attempts"], 0);
    }

    #[tokio::test]
    async fn test_retry_rejects_non_dead_job() {
        let (state, _dir) = test_state().await;
        let job = JobRow::new(
            "reserve",
            serde_json::json!({ "type": "reserve", "order_id": "o1" }),
            Some("o1".into()),
            3,
        );
        state.jobs.create(&job).await.unwrap();

        let (status, _) = send(
            &state,
            Request::post(format!("/api/jobs/dead-letter/{}/retry", job.id))
                .header("authorization", format!("Bearer {}", token(&state, "admin")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_purge_removes_dead_job() {
        let (state, _dir) = test_state().await;
        let job = seed_dead_job(&state).await;

        let (status, _) = send(
            &state,
            Request::delete(format!("/api/jobs/dead-letter/{}", job.id))
                .header("authorization", format!("Bearer {}", token(&state, "admin")))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.jobs.find(&job.id).await.unwrap().is_none());
    }
}
