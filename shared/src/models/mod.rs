//! Domain Models
//!
//! Plain data structs persisted by the server's repositories. All mutation of
//! order lifecycle state goes through the state machine in the server crate;
//! these types carry no behavior beyond small predicates.

pub mod key;
pub mod order;
pub mod payment;
pub mod product;
pub mod stock_item;
pub mod webhook_log;

// Re-exports
pub use key::Key;
pub use order::{Order, OrderCreate, OrderDetail, OrderItem, OrderItemCreate, OrderSource, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use product::{DeliveryType, Product};
pub use stock_item::{StockItem, StockState};
pub use webhook_log::{WebhookLogEntry, WebhookSource};
