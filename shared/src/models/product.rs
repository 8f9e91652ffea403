//! Product Model
//!
//! 目录管理在后台系统，这里只保留履约需要的字段。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shape of the delivery envelope for a product's secret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    /// 单个激活密钥
    Key,
    /// 账号 + 密码
    AccountCredential,
    /// 兑换码 + PIN
    CodePin,
    /// 许可证 + 附加元数据
    LicenseMetadata,
    /// 子条目打包（每个子条目自带类型）
    Bundle,
    /// 自由字段表
    Freeform,
}

/// 商品（履约视角）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub delivery_type: DeliveryType,
    /// 市场侧商品 ID — marketplace 路径按此字段匹配返回的密钥
    pub marketplace_product_id: Option<String>,
    pub price: Decimal,
    pub active: bool,
}
