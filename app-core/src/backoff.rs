//! 指数退避策略
//!
//! ```text
//! attempt    delay (base=1s, cap=30s)
//! ─────────────────────────────────
//!    1          1s
//!    2          2s
//!    3          4s
//!    4          8s
//!    5         16s
//!   >=6        30s
//! ```

use std::fmt;
use std::time::Duration;

/// 默认基础延迟
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// 默认最大延迟
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// 重连退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 连续失败达到此次数后放弃
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BackoffPolicy(base={:?}, max={:?}, max_attempts={})",
            self.base_delay, self.max_delay, self.max_attempts
        )
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// 第 `attempt` 次失败后的等待时间: `min(base * 2^(attempt-1), max)`
    ///
    /// `attempt` 从 1 开始；0 按 1 处理。
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// 失败次数是否已用尽重试预算
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
