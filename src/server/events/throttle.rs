//! 进度事件节流器
//!
//! 每个上传单元持有一个节流器，控制 Progress 事件的发布频率，避免事件风暴。
//! 进度存储本身不节流，只影响广播。

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

#[derive(Debug)]
struct ThrottleState {
    last_emit: Option<Instant>,
    last_progress: Option<u8>,
}

/// 进度事件节流器
///
/// 满足以下任一条件时允许发布：
/// - 首次上报
/// - 到达 100%（且此前未发布过 100%）
/// - 距上次发布超过间隔且百分比有变化
#[derive(Debug)]
pub struct ProgressThrottler {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ProgressThrottler {
    /// 创建新的节流器
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_emit: None,
                last_progress: None,
            }),
        }
    }

    /// 使用指定毫秒间隔创建节流器
    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 检查本次进度是否应该发布，返回 true 时已记录为已发布
    pub fn should_emit(&self, progress: u8) -> bool {
        self.should_emit_at(progress, Instant::now())
    }

    fn should_emit_at(&self, progress: u8, now: Instant) -> bool {
        let mut state = self.state.lock();

        let emit = match (state.last_emit, state.last_progress) {
            (None, _) | (_, None) => true,
            (Some(_), Some(last)) if progress == last => false,
            (Some(_), Some(_)) if progress >= 100 => true,
            (Some(at), Some(_)) => now.saturating_duration_since(at) >= self.interval,
        };

        if emit {
            state.last_emit = Some(now);
            state.last_progress = Some(progress);
        }
        emit
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}
