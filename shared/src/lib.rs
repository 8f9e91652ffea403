//! KeyGate Shared - 订单履约系统共享类型
//!
//! 领域模型与消息载荷，供服务端（以及未来的管理端）共用：
//!
//! - **models**: 订单、支付、Webhook 流水、密钥审计、库存、商品
//! - **message**: 状态推送总线的消息载荷
//! - **util**: 时间戳辅助函数

pub mod message;
pub mod models;
pub mod util;

// Re-export 常用类型
pub use message::{BusMessage, EventType, StatusPayload};
pub use models::{
    DeliveryType, Key, Order, OrderItem, OrderSource, OrderStatus, Payment, PaymentStatus,
    Product, StockItem, StockState, WebhookLogEntry, WebhookSource,
};
