//! Webhook 签名校验
//!
//! 两种签名方案，对应两个通知来源：
//!
//! - **支付 IPN**: HMAC-SHA512，签名对象是**按键名字典序递归排序**后的
//!   JSON 请求体（处理方的约定，顺序不同签名即不同）
//! - **市场通知**: HMAC-SHA256，直接对未解析的原始请求体签名
//!
//! 两者都通过 `Mac::verify_slice` 做常数时间比较，绝不用 `==` 比较签名。

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Sha256, Sha512};

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

/// 递归按键名字典序重排 JSON 对象后紧凑序列化
///
/// serde_json 的 Map 默认保序；这里逐层转 BTreeMap 实现排序。
/// 数组元素顺序保留（只排对象键）。
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    // Canonical form 序列化不会失败（输入已是合法 Value）
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

/// 计算支付 IPN 签名（排序 JSON + HMAC-SHA512，hex 输出）
pub fn sign_sorted_sha512(body: &Value, secret: &str) -> String {
    let canonical = canonical_json(body);
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// 校验支付 IPN 签名（常数时间）
///
/// `raw_body` 是原始请求体；先解析再排序，解析失败视为签名无效。
pub fn verify_sorted_sha512(raw_body: &[u8], signature_hex: &str, secret: &str) -> bool {
    let Ok(body) = serde_json::from_slice::<Value>(raw_body) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let canonical = canonical_json(&body);
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// 计算原始字节的 HMAC-SHA256 签名（hex 输出）
pub fn sign_raw_sha256(raw: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw);
    hex::encode(mac.finalize().into_bytes())
}

/// 校验市场通知签名：对未解析的原始请求体做 HMAC-SHA256（常数时间）
pub fn verify_raw_sha256(raw: &[u8], signature_hex: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-ipn-secret";

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let body = json!({
            "payment_id": "p1",
            "amount": 10,
            "nested": { "z": 1, "a": { "c": true, "b": null } }
        });
        assert_eq!(
            canonical_json(&body),
            r#"{"amount":10,"nested":{"a":{"b":null,"c":true},"z":1},"payment_id":"p1"}"#
        );
    }

    #[test]
    fn test_canonical_json_preserves_array_order() {
        let body = json!({ "items": [3, 1, 2] });
        assert_eq!(canonical_json(&body), r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn test_sorted_signature_roundtrip() {
        let body = json!({ "b": 2, "a": 1 });
        let sig = sign_sorted_sha512(&body, SECRET);
        // 同一 body 不同键序，签名一致
        let reordered = br#"{"b": 2, "a": 1}"#;
        assert!(verify_sorted_sha512(reordered, &sig, SECRET));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let body = json!({ "payment_id": "p1", "payment_status": "finished" });
        let sig = sign_sorted_sha512(&body, SECRET);
        let tampered = br#"{"payment_id":"p1","payment_status":"failed"}"#;
        assert!(!verify_sorted_sha512(tampered, &sig, SECRET));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = json!({ "x": 1 });
        let sig = sign_sorted_sha512(&body, SECRET);
        assert!(!verify_sorted_sha512(br#"{"x":1}"#, &sig, "other-secret"));
    }

    #[test]
    fn test_invalid_hex_or_json_rejected() {
        let body = json!({ "x": 1 });
        let sig = sign_sorted_sha512(&body, SECRET);
        assert!(!verify_sorted_sha512(b"not json", &sig, SECRET));
        assert!(!verify_sorted_sha512(br#"{"x":1}"#, "zz-not-hex", SECRET));
    }

    #[test]
    fn test_raw_sha256_roundtrip() {
        let raw = br#"{"orderId":"K1","status":"completed"}"#;
        let sig = sign_raw_sha256(raw, "mkt-secret");
        assert!(verify_raw_sha256(raw, &sig, "mkt-secret"));
        assert!(!verify_raw_sha256(b"other body", &sig, "mkt-secret"));
    }
}
