//! StatusBus — 状态广播总线
//!
//! 两张注册表：order_id → 关注该订单的连接集合，以及"看全部"的
//! 管理连接集合。发布时双路扇出。每个连接一条无界 mpsc 通道，
//! 发送失败（接收端已掉线）当场摘除注册，周期清理兜底。
//! 注册表按进程内单写者假设演进，DashMap 只为读写分离。

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use shared::message::BusMessage;
use shared::models::OrderStatus;

pub type ConnId = u64;

pub struct StatusBus {
    next_id: AtomicU64,
    /// conn_id → 推送通道
    senders: DashMap<ConnId, mpsc::UnboundedSender<BusMessage>>,
    /// order_id → 订阅连接
    order_subs: DashMap<String, HashSet<ConnId>>,
    /// 管理连接（接收一切订单的状态事件）
    admins: DashMap<ConnId, ()>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            senders: DashMap::new(),
            order_subs: DashMap::new(),
            admins: DashMap::new(),
        }
    }

    /// 登记连接，返回连接 ID 和接收端
    pub fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<BusMessage>) {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// 订阅某订单（鉴权在调用方：顾客只能订阅自己的订单）
    pub fn subscribe_order(&self, conn_id: ConnId, order_id: &str) {
        self.order_subs
            .entry(order_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    pub fn subscribe_admin(&self, conn_id: ConnId) {
        self.admins.insert(conn_id, ());
    }

    /// 连接断开：从所有注册表摘除
    pub fn unregister(&self, conn_id: ConnId) {
        self.senders.remove(&conn_id);
        self.admins.remove(&conn_id);
        self.order_subs.retain(|_, subs| {
            subs.remove(&conn_id);
            !subs.is_empty()
        });
    }

    /// 推送订单状态事件：订阅该订单的连接 + 全部管理连接
    pub fn publish_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        detail: Option<serde_json::Value>,
    ) {
        let message = BusMessage::order_status(order_id, status, detail);
        let mut targets: HashSet<ConnId> = HashSet::new();
        if let Some(subs) = self.order_subs.get(order_id) {
            targets.extend(subs.iter().copied());
        }
        targets.extend(self.admins.iter().map(|e| *e.key()));

        for conn_id in targets {
            self.push_to(conn_id, message.clone());
        }
    }

    /// 推送系统通知：只发给管理连接（顾客连接看不到运维事件）
    pub fn publish_notification(&self, title: &str, message: &str) {
        let msg = BusMessage::notification(title, message);
        let targets: Vec<ConnId> = self.admins.iter().map(|e| *e.key()).collect();
        for conn_id in targets {
            self.push_to(conn_id, msg.clone());
        }
    }

    fn push_to(&self, conn_id: ConnId, message: BusMessage) {
        let dead = match self.senders.get(&conn_id) {
            Some(sender) => sender.send(message).is_err(),
            None => true,
        };
        if dead {
            self.unregister(conn_id);
        }
    }

    /// 周期清理：摘除接收端已关闭的连接
    pub fn prune(&self) {
        let dead: Vec<ConnId> = self
            .senders
            .iter()
            .filter(|e| e.value().is_closed())
            .map(|e| *e.key())
            .collect();
        for conn_id in dead {
            self.unregister(conn_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
