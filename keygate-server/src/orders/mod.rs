//! 订单生命周期
//!
//! 状态推进只经由 [`transition::transition`]；仓储层不做生命周期判断。

pub mod transition;

pub use transition::{Effect, OrderEvent, Transition, transition};
