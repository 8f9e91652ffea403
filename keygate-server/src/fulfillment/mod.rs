//! 履约编排
//!
//! 业务核心：预留、交付信封、对象入库、完成收尾、崩溃恢复。

pub mod envelope;
pub mod orchestrator;

pub use orchestrator::Orchestrator;
