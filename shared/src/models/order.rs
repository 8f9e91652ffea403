//! Order Model
//!
//! 订单主表 + 条目。状态只能通过状态机 transition 推进，
//! 仓储层不做任何生命周期判断。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle status.
///
/// Success path: `created → waiting → confirming → paid → fulfilled`.
/// Terminal failure paths: `failed` and `underpaid` (underpaid is explicitly
/// non-refundable). Terminal states absorb every later event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Waiting,
    Confirming,
    Paid,
    Fulfilled,
    Failed,
    Underpaid,
}

impl OrderStatus {
    /// 终态：fulfilled / failed / underpaid 之后任何事件都不再改变状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Failed | Self::Underpaid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Confirming => "confirming",
            Self::Paid => "paid",
            Self::Fulfilled => "fulfilled",
            Self::Failed => "failed",
            Self::Underpaid => "underpaid",
        };
        write!(f, "{s}")
    }
}

/// How the order is fulfilled.
///
/// - `Custom`: pre-stocked inventory pool, delivered without the marketplace
/// - `Marketplace`: keys bought from the marketplace partner on demand
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSource {
    Custom,
    Marketplace,
}

/// 订单主记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_email: String,
    pub status: OrderStatus,
    pub source: OrderSource,
    /// 法币总额
    pub total: Decimal,
    pub currency: String,
    /// 市场侧预订单 ID（marketplace 订单下单成功后写入）
    pub reservation_id: Option<String>,
    /// 完成通知是否已发送（重投递守卫，绝不重置）
    pub completion_email_sent: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 订单条目，归属于唯一一个订单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// 交付后写入的限时签名下载链接
    pub signed_url: Option<String>,
    /// custom 路径：占用的库存条目 ID
    pub stock_item_id: Option<String>,
    pub delivered_at: Option<i64>,
}

impl OrderItem {
    pub fn is_delivered(&self) -> bool {
        self.signed_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// 下单请求 DTO。单价不由客户端提交，服务端按商品当前价格计算。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreate {
    pub customer_email: String,
    pub source: OrderSource,
    pub currency: String,
    pub items: Vec<OrderItemCreate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemCreate {
    pub product_id: String,
    pub quantity: u32,
}

/// 订单详情（轮询读路径返回）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}
