//! Order State Machine
//!
//! 纯函数：`(当前状态, 事件) -> (下一状态, 副作用列表)`。不做 I/O，
//! 不读数据库 —— 调用方负责落库和执行副作用。
//!
//! 终态（fulfilled / failed / underpaid）吸收一切事件：重放的
//! webhook 在终态之后到达是常态，返回原状态、零副作用即为幂等受理。

use shared::models::OrderStatus;

/// 驱动状态机的事件（支付通知 + 市场通知，已在 webhook 层归一化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    /// 支付处理方创建了支付尝试（顾客拿到付款地址）
    PaymentCreated,
    PaymentWaiting,
    PaymentConfirming,
    /// 链上确认完成，款项到账
    PaymentFinished,
    PaymentFailed,
    /// 到账金额不足 —— 终态，不退款
    PaymentUnderpaid,
    /// 市场已受理预订单
    MarketplaceReserved,
    /// 市场已交付，密钥可拉取
    MarketplaceDelivered,
    MarketplaceCanceled,
}

/// 状态推进产生的副作用（由调用方执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// 入队 reserve 任务（预留库存或下市场预订单）
    EnqueueReserve,
    /// 拉取密钥、标记条目、发完成邮件、推送状态
    CompleteDelivery,
    /// 推送取消通知
    BroadcastCancellation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: OrderStatus,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: OrderStatus) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(next: OrderStatus, effect: Effect) -> Self {
        Self {
            next,
            effects: vec![effect],
        }
    }

    /// 状态是否发生了变化
    pub fn changed_from(&self, current: OrderStatus) -> bool {
        self.next != current
    }
}

/// 状态转移表
///
/// 表中未列出的 (状态, 事件) 组合保持原状态、无副作用 ——
/// 乱序投递由幂等守卫吸收，状态机不报错。
pub fn transition(current: OrderStatus, event: OrderEvent) -> Transition {
    use OrderEvent::*;
    use OrderStatus::*;

    if current.is_terminal() {
        return Transition::to(current);
    }

    match (current, event) {
        (Created, PaymentCreated) => Transition::to(Waiting),
        (Created | Waiting | Confirming, PaymentWaiting | PaymentConfirming) => {
            Transition::to(Confirming)
        }
        (Created | Waiting | Confirming, PaymentFinished) => {
            Transition::with(Paid, Effect::EnqueueReserve)
        }
        (_, PaymentFailed) => Transition::to(Failed),
        (_, PaymentUnderpaid) => Transition::to(Underpaid),
        (Paid, MarketplaceReserved) => Transition::to(Paid),
        (Paid, MarketplaceDelivered) => Transition::with(Fulfilled, Effect::CompleteDelivery),
        (Paid, MarketplaceCanceled) => Transition::with(Failed, Effect::BroadcastCancellation),
        (state, _) => Transition::to(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderEvent::*;
    use OrderStatus::*;

    #[test]
    fn test_happy_path_custom() {
        let t = transition(Created, PaymentCreated);
        assert_eq!(t.next, Waiting);
        assert!(t.effects.is_empty());

        let t = transition(Waiting, PaymentConfirming);
        assert_eq!(t.next, Confirming);

        let t = transition(Confirming, PaymentFinished);
        assert_eq!(t.next, Paid);
        assert_eq!(t.effects, vec![Effect::EnqueueReserve]);
    }

    #[test]
    fn test_finished_skips_intermediate_states() {
        // 处理方有时只发最终通知
        let t = transition(Created, PaymentFinished);
        assert_eq!(t.next, Paid);
        assert_eq!(t.effects, vec![Effect::EnqueueReserve]);
    }

    #[test]
    fn test_marketplace_delivery_fulfills() {
        let t = transition(Paid, MarketplaceReserved);
        assert_eq!(t.next, Paid);
        assert!(t.effects.is_empty());

        let t = transition(Paid, MarketplaceDelivered);
        assert_eq!(t.next, Fulfilled);
        assert_eq!(t.effects, vec![Effect::CompleteDelivery]);
    }

    #[test]
    fn test_marketplace_cancellation_fails_order() {
        let t = transition(Paid, MarketplaceCanceled);
        assert_eq!(t.next, Failed);
        assert_eq!(t.effects, vec![Effect::BroadcastCancellation]);
    }

    #[test]
    fn test_failure_from_any_non_terminal() {
        for state in [Created, Waiting, Confirming, Paid] {
            assert_eq!(transition(state, PaymentFailed).next, Failed);
            assert_eq!(transition(state, PaymentUnderpaid).next, Underpaid);
        }
    }

    #[test]
    fn test_terminal_states_absorb_everything() {
        let events = [
            PaymentCreated,
            PaymentWaiting,
            PaymentConfirming,
            PaymentFinished,
            PaymentFailed,
            PaymentUnderpaid,
            MarketplaceReserved,
            MarketplaceDelivered,
            MarketplaceCanceled,
        ];
        for terminal in [Fulfilled, Failed, Underpaid] {
            for event in events {
                let t = transition(terminal, event);
                assert_eq!(t.next, terminal, "{terminal:?} absorbed {event:?}");
                assert!(t.effects.is_empty());
                assert!(!t.changed_from(terminal));
            }
        }
    }

    #[test]
    fn test_underpaid_sticks_over_later_finished() {
        // 先 underpaid 后另一支付尝试 finished：订单不重新打开
        let t = transition(Underpaid, PaymentFinished);
        assert_eq!(t.next, Underpaid);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_unlisted_combinations_are_noops() {
        // paid 状态下的早期支付事件不回退状态
        for event in [PaymentCreated, PaymentWaiting, PaymentConfirming] {
            let t = transition(Paid, event);
            assert_eq!(t.next, Paid);
            assert!(t.effects.is_empty());
        }
        // 未 paid 的订单收到市场事件：保持现状
        let t = transition(Confirming, MarketplaceDelivered);
        assert_eq!(t.next, Confirming);
        assert!(t.effects.is_empty());
    }
}
