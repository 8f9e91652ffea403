//! Delivery Envelope
//!
//! 密钥密文在入库对象存储前按商品声明的交付类型编码成统一信封。
//! 库存/市场给的原始载荷是一条字符串，各类型的拆分约定：
//!
//! - `key`: 原样序列号
//! - `account_credential`: `username:password`
//! - `code_pin`: `code|pin`
//! - `license_metadata`: JSON 对象 `{ "license": ..., ... }`，
//!   解析失败时整条作为 license
//! - `bundle`: 每条载荷一个子项（子项本身可以是 JSON）
//! - `freeform`: JSON 对象的键值对原样透传，解析失败退化为单字段

use serde_json::{Value, json};
use shared::models::DeliveryType;

/// 编码一个订单条目的交付信封
///
/// `payloads` 是该条目占用的全部密文（quantity > 1 时多条）。
pub fn encode(delivery_type: DeliveryType, product_name: &str, payloads: &[String]) -> Value {
    let content: Value = match delivery_type {
        DeliveryType::Key => json!({ "serials": payloads }),
        DeliveryType::AccountCredential => {
            let accounts: Vec<Value> = payloads
                .iter()
                .map(|p| match p.split_once(':') {
                    Some((user, pass)) => json!({ "username": user, "password": pass }),
                    None => json!({ "username": p, "password": "" }),
                })
                .collect();
            json!({ "accounts": accounts })
        }
        DeliveryType::CodePin => {
            let codes: Vec<Value> = payloads
                .iter()
                .map(|p| match p.split_once('|') {
                    Some((code, pin)) => json!({ "code": code, "pin": pin }),
                    None => json!({ "code": p, "pin": Value::Null }),
                })
                .collect();
            json!({ "codes": codes })
        }
        DeliveryType::LicenseMetadata => {
            let licenses: Vec<Value> = payloads
                .iter()
                .map(|p| match serde_json::from_str::<Value>(p) {
                    Ok(Value::Object(obj)) => Value::Object(obj),
                    _ => json!({ "license": p }),
                })
                .collect();
            json!({ "licenses": licenses })
        }
        DeliveryType::Bundle => {
            let items: Vec<Value> = payloads
                .iter()
                .map(|p| serde_json::from_str::<Value>(p).unwrap_or_else(|_| json!({ "value": p })))
                .collect();
            json!({ "items": items })
        }
        DeliveryType::Freeform => {
            let fields: Vec<Value> = payloads
                .iter()
                .map(|p| match serde_json::from_str::<Value>(p) {
                    Ok(Value::Object(obj)) => Value::Object(obj),
                    _ => json!({ "value": p }),
                })
                .collect();
            json!({ "fields": fields })
        }
    };

    json!({
        "product": product_name,
        "delivery_type": delivery_type,
        "content": content,
    })
}
