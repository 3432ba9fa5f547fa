//! 事件模块
//!
//! - `types.rs`: 上传事件类型
//! - `throttle.rs`: 进度事件节流

mod throttle;
mod types;

pub use throttle::*;
pub use types::*;
