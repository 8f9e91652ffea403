use keygate_server::{Config, Server, ServerState, init_logger_with_file, print_banner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境与日志
    dotenv::dotenv().ok();
    let log_dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(std::env::var("LOG_LEVEL").ok().as_deref(), log_dir.as_deref());

    print_banner();
    tracing::info!("KeyGate Server starting...");

    // 2. 配置
    let config = Config::from_env();
    tracing::info!(
        environment = %config.environment,
        work_dir = %config.work_dir,
        workers = config.job_workers,
        "Configuration loaded"
    );

    // 3. 初始化状态（仓储、编排器、任务通道）
    let (state, job_rx) = ServerState::initialize(config).await?;

    // 4. 启动 HTTP 服务（内部拉起 worker 池与后台任务）
    if let Err(e) = Server::run(state, job_rx).await {
        tracing::error!("Server error: {e}");
        return Err(e.into());
    }

    Ok(())
}
