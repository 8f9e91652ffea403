//! 核心模块
//!
//! 配置、服务器状态、HTTP 服务生命周期和后台任务管理。

pub mod config;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use server::Server;
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
