//! 时间辅助函数

use chrono::Utc;

/// 当前 Unix 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 当前 Unix 秒时间戳
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// 生成 UUID v4 字符串（订单、条目、任务等的主键）
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }

    #[test]
    fn test_new_id_unique() {
        assert_ne!(new_id(), new_id());
    }
}
