//! Job Dispatcher
//!
//! 入队：先写 `job` 表再投内存通道（崩溃后启动扫描兜底）。
//! 执行：worker 池从共享通道取任务 ID，读行、执行、按结果落库。
//! 重试：指数退避，起步 2s，默认 3 次；耗尽或业务性失败入死信。

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{JobError, JobExecutor, JobKind};
use crate::db::repository::{JobRepository, JobRow, JobStatus};
use crate::message::StatusBus;
use crate::utils::{AppError, AppResult};
use shared::util::now_millis;

/// 重试策略。测试里把退避调小。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i64,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// 第 n 次尝试失败后的退避：initial * 2^(n-1)
    pub fn backoff_ms(&self, attempt: i64) -> u64 {
        self.initial_backoff_ms
            .saturating_mul(1u64 << (attempt - 1).clamp(0, 16) as u32)
    }
}

/// 入队侧句柄（webhook 处理器、管理端持有）
#[derive(Clone)]
pub struct JobDispatcher {
    repo: JobRepository,
    tx: mpsc::UnboundedSender<String>,
    policy: RetryPolicy,
}

impl JobDispatcher {
    pub fn new(
        repo: JobRepository,
        policy: RetryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { repo, tx, policy }, rx)
    }

    /// 持久化并入队，返回任务 ID
    pub async fn enqueue(&self, kind: &JobKind) -> AppResult<String> {
        let payload = serde_json::to_value(kind)
            .map_err(|e| AppError::internal(format!("Job payload encoding failed: {e}")))?;
        let row = JobRow::new(
            kind.name(),
            payload,
            kind.order_id().map(|s| s.to_string()),
            self.policy.max_attempts,
        );
        self.repo.create(&row).await?;
        // 通道关闭说明进程在停机，行已持久化，下次启动扫描接手
        if self.tx.send(row.id.clone()).is_err() {
            tracing::warn!(job_id = %row.id, "Job channel closed, row will be picked up on restart");
        }
        tracing::debug!(job_id = %row.id, kind = kind.name(), "Job enqueued");
        Ok(row.id)
    }

    /// 启动扫描：把 queued/running 的遗留行重新入队
    pub async fn requeue_pending(&self) -> AppResult<usize> {
        let pending = self.repo.pending_jobs().await?;
        let count = pending.len();
        for row in pending {
            if self.tx.send(row.id).is_err() {
                break;
            }
        }
        if count > 0 {
            tracing::info!(count, "Requeued unfinished jobs from previous run");
        }
        Ok(count)
    }

    /// 重试投递用的发送端（worker 退避后重新入队）
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.tx.clone()
    }

    /// 管理端：死信重试
    pub async fn retry_dead(&self, job_id: &str) -> AppResult<JobRow> {
        let row = self.repo.requeue_dead(job_id).await?;
        if self.tx.send(row.id.clone()).is_err() {
            tracing::warn!(job_id = %row.id, "Job channel closed during dead-letter retry");
        }
        Ok(row)
    }
}

/// worker 池。所有 worker 共享一个接收端（Mutex 轮转）。
pub struct JobRunner {
    repo: JobRepository,
    executor: Arc<dyn JobExecutor>,
    retry_tx: mpsc::UnboundedSender<String>,
    policy: RetryPolicy,
    bus: Arc<StatusBus>,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(
        repo: JobRepository,
        executor: Arc<dyn JobExecutor>,
        retry_tx: mpsc::UnboundedSender<String>,
        policy: RetryPolicy,
        bus: Arc<StatusBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repo,
            executor,
            retry_tx,
            policy,
            bus,
            shutdown,
        }
    }

    /// 启动 `workers` 个 worker，返回各自的 JoinHandle
    pub fn spawn(
        self,
        rx: mpsc::UnboundedReceiver<String>,
        workers: usize,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let runner = Arc::new(self);
        let rx = Arc::new(Mutex::new(rx));
        (0..workers)
            .map(|worker_id| {
                let runner = runner.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    runner.worker_loop(worker_id, rx).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>) {
        tracing::info!(worker_id, "Job worker started");
        loop {
            let job_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                id = async { rx.lock().await.recv().await } => id,
            };
            let Some(job_id) = job_id else { break };
            self.run_job(&job_id).await;
        }
        tracing::info!(worker_id, "Job worker stopped");
    }

    /// 死信要人工介入，推给在线的管理连接
    fn notify_dead(&self, kind: &str, job_id: &str, reason: &str) {
        self.bus.publish_notification(
            "job_dead_letter",
            &format!("{kind} job {job_id} moved to dead letter: {reason}"),
        );
    }

    async fn run_job(&self, job_id: &str) {
        let job = match self.repo.find(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Job row vanished, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, "Failed to load job: {e}");
                return;
            }
        };
        // done/dead 的行可能被重复投递（启动扫描 + 通道遗留）
        if matches!(job.status, JobStatus::Done | JobStatus::Dead) {
            return;
        }

        // 退避未到期：等到期再执行
        let wait_ms = job.not_before.saturating_sub(now_millis());
        if wait_ms > 0 {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(wait_ms as u64)) => {}
            }
        }

        let kind: JobKind = match serde_json::from_value(job.payload.clone()) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::error!(job_id = %job_id, "Unparseable job payload: {e}");
                let _ = self
                    .repo
                    .move_dead(job_id, &format!("Unparseable payload: {e}"), "fatal")
                    .await;
                self.notify_dead(&job.kind, job_id, &format!("unparseable payload: {e}"));
                return;
            }
        };

        if let Err(e) = self.repo.set_running(job_id).await {
            tracing::error!(job_id = %job_id, "Failed to mark job running: {e}");
            return;
        }
        let attempt = job.attempts + 1;

        match self.executor.execute(&kind).await {
            Ok(()) => {
                if let Err(e) = self.repo.complete(job_id).await {
                    tracing::error!(job_id = %job_id, "Failed to mark job done: {e}");
                }
                tracing::info!(job_id = %job_id, kind = kind.name(), attempt, "Job completed");
            }
            Err(JobError::Retryable(msg)) if attempt < job.max_attempts => {
                let backoff = self.policy.backoff_ms(attempt);
                tracing::warn!(
                    job_id = %job_id,
                    kind = kind.name(),
                    attempt,
                    backoff_ms = backoff,
                    "Job failed, scheduling retry: {msg}"
                );
                if let Err(e) = self
                    .repo
                    .schedule_retry(job_id, &msg, now_millis() + backoff as i64)
                    .await
                {
                    tracing::error!(job_id = %job_id, "Failed to schedule retry: {e}");
                    return;
                }
                // 退避后重新投递；到期检查在取出侧
                let retry_tx = self.retry_tx.clone();
                let job_id = job_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    let _ = retry_tx.send(job_id);
                });
            }
            Err(JobError::Retryable(msg)) => {
                tracing::error!(
                    job_id = %job_id,
                    kind = kind.name(),
                    attempt,
                    "Job exhausted retries, moving to dead letter: {msg}"
                );
                let _ = self.repo.move_dead(job_id, &msg, "transient").await;
                self.notify_dead(kind.name(), job_id, &msg);
            }
            Err(JobError::Fatal(msg)) => {
                tracing::error!(
                    job_id = %job_id,
                    kind = kind.name(),
                    attempt,
                    "Job failed fatally, moving to dead letter: {msg}"
                );
                let _ = self.repo.move_dead(job_id, &msg, "fatal").await;
                self.notify_dead(kind.name(), job_id, &msg);
            }
        }
    }
}
