//! KeyGate Server - 加密货币支付数字密钥商店的履约编排服务
//!
//! # 架构概述
//!
//! 本模块是 KeyGate Server 的主入口，提供以下核心功能：
//!
//! - **webhook 去重** (`db::repository::webhook_log`): 唯一索引幂等流水
//! - **订单状态机** (`orders`): 纯函数 transition，终态吸收
//! - **持久任务队列** (`jobs`): 先落库再入队，指数退避 + 死信
//! - **履约编排** (`fulfillment`): 自有库存 / 市场两条交付路径
//! - **状态推送** (`message`): WebSocket 状态总线
//! - **HTTP API** (`api`): webhook 入口、下单查询、管理端
//!
//! # 模块结构
//!
//! ```text
//! keygate-server/src/
//! ├── core/          # 配置、状态、服务生命周期、后台任务
//! ├── auth/          # JWT 认证、订单归属
//! ├── services/      # 市场 API、保管库、库存、邮件
//! ├── fulfillment/   # 履约编排器、交付信封
//! ├── jobs/          # 任务队列、重试、死信
//! ├── api/           # HTTP 路由和处理器
//! ├── orders/        # 订单状态机
//! ├── message/       # 状态广播总线
//! ├── db/            # 数据库层（嵌入式 SurrealDB）
//! └── utils/         # 错误、日志、签名
//! ```

pub mod api;
pub mod auth;
pub mod core;
pub mod db;
pub mod fulfillment;
pub mod jobs;
pub mod message;
pub mod orders;
pub mod services;
pub mod utils;

// Re-export 公共类型
pub use auth::{CurrentUser, JwtService};
pub use core::{Config, Server, ServerState};
pub use message::StatusBus;
pub use orders::{Effect, OrderEvent, transition};
pub use utils::{AppError, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
    __ __           ______      __
   / //_/__  __  __/ ____/___ _/ /____
  / ,<  / _ \/ / / / / __/ __ `/ __/ _ \
 / /| |/  __/ /_/ / /_/ / /_/ / /_/  __/
/_/ |_|\___/\__, /\____/\__,_/\__/\___/
           /____/
    "#
    );
}
