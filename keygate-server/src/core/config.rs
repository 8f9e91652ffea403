use crate::auth::JwtConfig;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

/// 必须在生产环境显式配置的密钥；开发环境缺省时给固定值并告警
fn secret_or_dev(name: &str, environment: &str) -> String {
    match std::env::var(name) {
        Ok(value) => value,
        Err(_) => {
            if environment == "production" {
                // 启动阶段报错由 ServerState::initialize 统一处理
                tracing::error!("{name} is not set; refusing to use a dev fallback in production");
                String::new()
            } else {
                tracing::warn!("{name} not set, using insecure development fallback");
                format!("dev-{}-secret-not-for-production!!", name.to_lowercase())
            }
        }
    }
}

/// 服务器配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/keygate | 工作目录（数据库、密钥保管库、日志） |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | PUBLIC_BASE_URL | http://localhost:3000 | 对外基址（签名下载链接用） |
/// | ENVIRONMENT | development | 运行环境 |
/// | IPN_SECRET | (dev fallback) | 支付 IPN 签名密钥 |
/// | MARKETPLACE_WEBHOOK_SECRET | (dev fallback) | 市场通知签名密钥 |
/// | STORAGE_URL_SECRET | (dev fallback) | 下载链接签名密钥 |
/// | JWT_SECRET | (dev fallback) | JWT 签名密钥 |
/// | MARKETPLACE_URL | https://api.marketplace.example | 市场 API 基址 |
/// | MARKETPLACE_API_KEY | (空) | 市场 API 密钥 |
/// | MAIL_GATEWAY_URL | (未设置则仅记日志) | 邮件网关 |
/// | SIGNED_URL_TTL_SECS | 10800 | 下载链接有效期（3 小时） |
/// | JOB_WORKERS | 4 | 任务 worker 数 |
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    pub http_port: u16,
    pub public_base_url: String,
    /// development | staging | production
    pub environment: String,

    // === 签名密钥 ===
    pub ipn_secret: String,
    pub marketplace_webhook_secret: String,
    pub storage_url_secret: String,
    pub jwt: JwtConfig,

    // === 协作方 ===
    pub marketplace_url: String,
    pub marketplace_api_key: String,
    pub mail_gateway_url: Option<String>,

    // === 履约参数 ===
    pub signed_url_ttl_secs: u64,
    pub job_workers: usize,
    pub shutdown_timeout_ms: u64,
}

impl Config {
    /// 从环境变量加载配置，未设置的用默认值
    pub fn from_env() -> Self {
        let environment = env_or("ENVIRONMENT", "development");
        Self {
            work_dir: env_or("WORK_DIR", "/var/lib/keygate"),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:3000"),
            ipn_secret: secret_or_dev("IPN_SECRET", &environment),
            marketplace_webhook_secret: secret_or_dev("MARKETPLACE_WEBHOOK_SECRET", &environment),
            storage_url_secret: secret_or_dev("STORAGE_URL_SECRET", &environment),
            jwt: JwtConfig::new(&secret_or_dev("JWT_SECRET", &environment)),
            marketplace_url: env_or("MARKETPLACE_URL", "https://api.marketplace.example"),
            marketplace_api_key: env_or("MARKETPLACE_API_KEY", ""),
            mail_gateway_url: std::env::var("MAIL_GATEWAY_URL").ok(),
            signed_url_ttl_secs: std::env::var("SIGNED_URL_TTL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10_800),
            job_workers: std::env::var("JOB_WORKERS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4),
            shutdown_timeout_ms: std::env::var("SHUTDOWN_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10_000),
            environment,
        }
    }

    /// 测试场景覆盖工作目录和端口
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 缺失的生产密钥清单（启动校验用）
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.ipn_secret.is_empty() {
            missing.push("IPN_SECRET");
        }
        if self.marketplace_webhook_secret.is_empty() {
            missing.push("MARKETPLACE_WEBHOOK_SECRET");
        }
        if self.storage_url_secret.is_empty() {
            missing.push("STORAGE_URL_SECRET");
        }
        if self.jwt.secret.is_empty() {
            missing.push("JWT_SECRET");
        }
        missing
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
