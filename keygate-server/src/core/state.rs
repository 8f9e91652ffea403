//! 服务器状态
//!
//! 组合根：仓储、协作方客户端、编排器、任务调度、状态总线。
//! Clone 是浅拷贝（内部全是 Arc / 可克隆句柄）。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::JwtService;
use crate::core::Config;
use crate::db::DbService;
use crate::db::repository::{
    JobRepository, KeyRepository, OrderRepository, PaymentRepository, ProductRepository,
    StockRepository, WebhookLogRepository,
};
use crate::fulfillment::Orchestrator;
use crate::jobs::{JobDispatcher, RetryPolicy};
use crate::message::StatusBus;
use crate::services::{FsVault, HttpMarketplace, HttpNotifier, StockInventory};
use crate::utils::{AppError, AppResult};

#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub db: DbService,

    // === 仓储 ===
    pub orders: OrderRepository,
    pub payments: PaymentRepository,
    pub webhook_log: WebhookLogRepository,
    pub products: ProductRepository,
    pub keys: KeyRepository,
    pub stock: StockRepository,
    pub jobs: JobRepository,

    // === 服务 ===
    pub jwt_service: Arc<JwtService>,
    pub bus: Arc<StatusBus>,
    pub storage: Arc<FsVault>,
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: JobDispatcher,
}

impl ServerState {
    /// 初始化全部组件。返回状态和任务通道接收端
    /// （接收端交给 [`crate::core::Server`] 启动 worker 池）。
    pub async fn initialize(config: Config) -> AppResult<(Self, mpsc::UnboundedReceiver<String>)> {
        if config.is_production() {
            let missing = config.missing_secrets();
            if !missing.is_empty() {
                return Err(AppError::internal(format!(
                    "Missing required secrets in production: {}",
                    missing.join(", ")
                )));
            }
        }

        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .map_err(|e| AppError::internal(format!("Failed to create work dir: {e}")))?;

        let db = DbService::new(&format!("{}/db", config.work_dir)).await?;
        Self::assemble(config, db)
    }

    /// 内存库版本（HTTP 层测试用）
    #[cfg(test)]
    pub async fn initialize_in_memory(
        config: Config,
    ) -> AppResult<(Self, mpsc::UnboundedReceiver<String>)> {
        let db = DbService::new_memory().await?;
        Self::assemble(config, db)
    }

    fn assemble(
        config: Config,
        db: DbService,
    ) -> AppResult<(Self, mpsc::UnboundedReceiver<String>)> {
        let orders = OrderRepository::new(db.handle());
        let payments = PaymentRepository::new(db.handle());
        let webhook_log = WebhookLogRepository::new(db.handle());
        let products = ProductRepository::new(db.handle());
        let keys = KeyRepository::new(db.handle());
        let stock = StockRepository::new(db.handle());
        let jobs = JobRepository::new(db.handle());

        let jwt_service = Arc::new(JwtService::with_config(config.jwt.clone()));
        let bus = Arc::new(StatusBus::new());
        let storage = Arc::new(FsVault::new(
            format!("{}/vault", config.work_dir),
            &config.storage_url_secret,
            &config.public_base_url,
        ));
        let marketplace = Arc::new(HttpMarketplace::new(
            &config.marketplace_url,
            &config.marketplace_api_key,
        )?);
        let notifier = Arc::new(HttpNotifier::new(config.mail_gateway_url.clone())?);

        let (dispatcher, job_rx) = JobDispatcher::new(jobs.clone(), RetryPolicy::default());

        let orchestrator = Arc::new(Orchestrator::new(
            orders.clone(),
            products.clone(),
            keys.clone(),
            marketplace,
            storage.clone(),
            Arc::new(StockInventory::new(stock.clone())),
            notifier,
            bus.clone(),
            dispatcher.clone(),
            config.signed_url_ttl_secs,
        ));

        let state = Self {
            config,
            db,
            orders,
            payments,
            webhook_log,
            products,
            keys,
            stock,
            jobs,
            jwt_service,
            bus,
            storage,
            orchestrator,
            dispatcher,
        };
        Ok((state, job_rx))
    }

    pub fn jwt_service(&self) -> Arc<JwtService> {
        self.jwt_service.clone()
    }
}
