//! 死信管理（管理端）
//!
//! 任务重试耗尽或业务性失败后进死信，留给人工裁决：
//! 修复根因后重试，或确认无法履约后清除。

mod handler;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/jobs/dead-letter", get(handler::dead_letter))
        .route("/api/jobs/dead-letter/{job_id}/retry", post(handler::retry))
        .route("/api/jobs/dead-letter/{job_id}", delete(handler::purge))
}
