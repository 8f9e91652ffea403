//! 工具模块

pub mod error;
pub mod logger;
pub mod signature;

pub use error::{AppError, AppResponse, ok};

/// Result alias for API handlers
pub type AppResult<T> = Result<T, AppError>;
