//! 认证
//!
//! HS256 JWT。两种角色：`customer`（只能看自己的订单）和
//! `admin`（死信页、webhook 流水、全量状态流）。

pub mod extractor;
pub mod jwt;

pub use jwt::{Claims, CurrentUser, JwtConfig, JwtError, JwtService};
