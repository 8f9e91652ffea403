//! Job Repository
//!
//! 持久化任务队列。每个任务先落 `job` 表再入内存通道，进程重启后
//! 启动扫描把 queued/running 的行重新入队 —— running 说明上次
//! 运行中途崩溃，处理器必须幂等。

use super::{BaseRepository, RepoError, RepoResult, content_of};
use serde::{Deserialize, Serialize};
use shared::util::{new_id, now_millis};
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "job";

/// 任务生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 等待执行（含退避等待中的重试）
    Queued,
    /// 某个 worker 正在执行
    Running,
    /// 成功完成
    Done,
    /// 重试耗尽或业务性失败，等待人工处置
    Dead,
}

/// 任务行。`kind` 是 payload 里的标签字段的冗余副本，便于按类型查询。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    /// 毫秒时间戳，退避到期前不执行
    pub not_before: i64,
    pub last_error: Option<String>,
    /// "transient" / "fatal"，死信页用来区分失败类别
    pub error_kind: Option<String>,
    pub order_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobRow {
    pub fn new(
        kind: &str,
        payload: serde_json::Value,
        order_id: Option<String>,
        max_attempts: i64,
    ) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            kind: kind.to_string(),
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            not_before: now,
            last_error: None,
            error_kind: None,
            order_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone)]
pub struct JobRepository {
    base: BaseRepository,
}

impl JobRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn create(&self, job: &JobRow) -> RepoResult<()> {
        self.base
            .db()
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", job.id.clone()))
            .bind(("data", content_of(job)?))
            .await?;
        Ok(())
    }

    pub async fn find(&self, job_id: &str) -> RepoResult<Option<JobRow>> {
        let mut result = self
            .base
            .db()
            .query("SELECT *, record::id(id) AS id FROM type::thing($tb, $id)")
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .await?;
        let jobs: Vec<JobRow> = result.take(0)?;
        Ok(jobs.into_iter().next())
    }

    pub async fn get(&self, job_id: &str) -> RepoResult<JobRow> {
        self.find(job_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Job {job_id} not found")))
    }

    /// queued → running，并累加 attempts
    pub async fn set_running(&self, job_id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET status = 'running', attempts += 1, updated_at = $now",
            )
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    pub async fn complete(&self, job_id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE type::thing($tb, $id) SET status = 'done', updated_at = $now")
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 失败但仍有余量：回到 queued，记下错误和退避到期时间
    pub async fn schedule_retry(
        &self,
        job_id: &str,
        error: &str,
        not_before: i64,
    ) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET status = 'queued', last_error = $err,
                     error_kind = 'transient', not_before = $nb, updated_at = $now",
            )
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .bind(("err", error.to_string()))
            .bind(("nb", not_before))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 入死信：重试耗尽（transient）或业务性失败（fatal）
    pub async fn move_dead(&self, job_id: &str, error: &str, error_kind: &str) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET status = 'dead', last_error = $err,
                     error_kind = $ek, updated_at = $now",
            )
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .bind(("err", error.to_string()))
            .bind(("ek", error_kind.to_string()))
            .bind(("now", now_millis()))
            .await?;
        Ok(())
    }

    /// 启动扫描：所有未完成的行（queued + 崩溃遗留的 running）
    pub async fn pending_jobs(&self) -> RepoResult<Vec<JobRow>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM job
                 WHERE status IN ['queued', 'running']
                 ORDER BY created_at ASC",
            )
            .await?;
        let jobs: Vec<JobRow> = result.take(0)?;
        Ok(jobs)
    }

    pub async fn dead_letter_list(&self) -> RepoResult<Vec<JobRow>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM job
                 WHERE status = 'dead' ORDER BY updated_at DESC",
            )
            .await?;
        let jobs: Vec<JobRow> = result.take(0)?;
        Ok(jobs)
    }

    /// 死信重试：重置计数回到 queued。只对 dead 行生效。
    pub async fn requeue_dead(&self, job_id: &str) -> RepoResult<JobRow> {
        let mut result = self
            .base
            .db()
            .query(
                "UPDATE type::thing($tb, $id)
                 SET status = 'queued', attempts = 0, last_error = NONE,
                     error_kind = NONE, not_before = $now, updated_at = $now
                 WHERE status = 'dead'
                 RETURN *, record::id(id) AS id",
            )
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .bind(("now", now_millis()))
            .await?;
        let jobs: Vec<JobRow> = result.take(0)?;
        jobs.into_iter().next().ok_or_else(|| {
            RepoError::Validation(format!("Job {job_id} is not in the dead-letter queue"))
        })
    }

    pub async fn purge_dead(&self, job_id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("DELETE type::thing($tb, $id) WHERE status = 'dead'")
            .bind(("tb", TABLE))
            .bind(("id", job_id.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;

    async fn repo() -> JobRepository {
        let db = DbService::new_memory().await.unwrap();
        JobRepository::new(db.handle())
    }

    fn sample_job() -> JobRow {
        JobRow::new(
            "reserve",
            serde_json::json!({ "type": "reserve", "order_id": "order-1" }),
            Some("order-1".into()),
            3,
        )
    }

    #[tokio::test]
    async fn test_lifecycle_to_done() {
        let repo = repo().await;
        let job = sample_job();
        repo.create(&job).await.unwrap();

        repo.set_running(&job.id).await.unwrap();
        let running = repo.get(&job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.attempts, 1);

        repo.complete(&job.id).await.unwrap();
        assert_eq!(repo.get(&job.id).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_retry_then_dead() {
        let repo = repo().await;
        let job = sample_job();
        repo.create(&job).await.unwrap();

        repo.set_running(&job.id).await.unwrap();
        repo.schedule_retry(&job.id, "connection refused", now_millis() + 2000)
            .await
            .unwrap();
        let retried = repo.get(&job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.error_kind.as_deref(), Some("transient"));

        repo.move_dead(&job.id, "no stock", "fatal").await.unwrap();
        let dead = repo.get(&job.id).await.unwrap();
        assert_eq!(dead.status, JobStatus::Dead);
        assert_eq!(dead.error_kind.as_deref(), Some("fatal"));
    }

    #[tokio::test]
    async fn test_pending_includes_crashed_running() {
        let repo = repo().await;
        let queued = sample_job();
        let crashed = sample_job();
        let done = sample_job();
        repo.create(&queued).await.unwrap();
        repo.create(&crashed).await.unwrap();
        repo.create(&done).await.unwrap();
        repo.set_running(&crashed.id).await.unwrap();
        repo.set_running(&done.id).await.unwrap();
        repo.complete(&done.id).await.unwrap();

        let pending = repo.pending_jobs().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.id.as_str()).collect();
        assert!(ids.contains(&queued.id.as_str()));
        assert!(ids.contains(&crashed.id.as_str()));
        assert!(!ids.contains(&done.id.as_str()));
    }

    #[tokio::test]
    async fn test_requeue_dead_resets_counters() {
        let repo = repo().await;
        let job = sample_job();
        repo.create(&job).await.unwrap();
        repo.set_running(&job.id).await.unwrap();
        repo.move_dead(&job.id, "boom", "transient").await.unwrap();

        let requeued = repo.requeue_dead(&job.id).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.attempts, 0);
        assert!(requeued.last_error.is_none());

        // 非 dead 行不能 requeue
        let err = repo.requeue_dead(&job.id).await.unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[tokio::test]
    async fn test_purge_only_removes_dead() {
        let repo = repo().await;
        let alive = sample_job();
        let dead = sample_job();
        repo.create(&alive).await.unwrap();
        repo.create(&dead).await.unwrap();
        repo.move_dead(&dead.id, "x", "fatal").await.unwrap();

        repo.purge_dead(&dead.id).await.unwrap();
        repo.purge_dead(&alive.id).await.unwrap();

        assert!(repo.find(&dead.id).await.unwrap().is_none());
        assert!(repo.find(&alive.id).await.unwrap().is_some());
    }
}
