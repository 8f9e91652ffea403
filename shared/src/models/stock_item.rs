//! Stock Item Model
//!
//! 预置库存池（custom 路径）。按 product_id 分组、created_at FIFO 出库。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Inventory state of a single pre-stocked unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StockState {
    Available,
    Reserved,
    Sold,
}

/// 一个库存单元，payload 为密文载荷（按商品 delivery_type 解析）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItem {
    pub id: String,
    pub product_id: String,
    /// 私密载荷（JSON，shape 由商品 delivery_type 决定）
    pub payload: String,
    pub state: StockState,
    /// Reserved/Sold 时指向占用订单
    pub reserved_by: Option<String>,
    pub sold_price: Option<Decimal>,
    pub created_at: i64,
    pub updated_at: i64,
}
