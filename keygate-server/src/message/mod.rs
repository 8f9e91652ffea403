//! 状态推送
//!
//! 订单状态变化的进程内扇出。无持久化要求，推送尽力而为 ——
//! 轮询读路径才是权威数据源。

pub mod bus;

pub use bus::StatusBus;
