//! HTTP 服务生命周期
//!
//! 绑定监听、装配路由、启动后台任务（worker 池、总线清理）、
//! 处理优雅停机。启动时先做任务表扫描，把上次运行遗留的
//! queued/running 行重新入队。

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::api;
use crate::core::{BackgroundTasks, ServerState, TaskKind};
use crate::jobs::{JobExecutor, JobRunner, RetryPolicy};
use crate::utils::{AppError, AppResult};

/// 状态总线清理周期
const BUS_PRUNE_INTERVAL_SECS: u64 = 30;

pub struct Server;

impl Server {
    pub async fn run(
        state: ServerState,
        job_rx: mpsc::UnboundedReceiver<String>,
    ) -> AppResult<()> {
        let mut tasks = BackgroundTasks::new();
        let shutdown = tasks.shutdown_token();

        // 崩溃遗留的任务先回队列
        let requeued = state.dispatcher.requeue_pending().await?;
        if requeued > 0 {
            tracing::info!(requeued, "Resumed unfinished jobs from previous run");
        }

        // worker 池
        let runner = JobRunner::new(
            state.jobs.clone(),
            state.orchestrator.clone() as Arc<dyn JobExecutor>,
            state.dispatcher.sender(),
            RetryPolicy::default(),
            state.bus.clone(),
            shutdown.clone(),
        );
        let workers = state.config.job_workers;
        tasks.spawn("job_workers", TaskKind::Worker, async move {
            let handles = runner.spawn(job_rx, workers);
            for handle in handles {
                let _ = handle.await;
            }
        });

        // 状态总线周期清理
        let bus = state.bus.clone();
        let prune_token = shutdown.clone();
        tasks.spawn("status_bus_prune", TaskKind::Periodic, async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(BUS_PRUNE_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = prune_token.cancelled() => break,
                    _ = interval.tick() => bus.prune(),
                }
            }
        });
        tasks.log_summary();

        let app = api::router(state.clone());
        let addr = format!("0.0.0.0:{}", state.config.http_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;
        tracing::info!(addr = %addr, "HTTP server listening");

        let graceful = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {},
                    _ = graceful.cancelled() => {},
                }
            })
            .await
            .map_err(|e| AppError::internal(format!("HTTP server error: {e}")))?;

        tracing::info!("HTTP server stopped, draining background tasks");
        tasks.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutdown signal received");
}
