//! 轮询间隔策略
//!
//! 三档决策表：隐藏优先于一切，其次看用户是否活跃。

use std::time::Duration;

use crate::config::IntervalConfig;

pub const ACTIVE_INTERVAL_MS: u64 = 2_000;
pub const IDLE_INTERVAL_MS: u64 = 15_000;
pub const HIDDEN_INTERVAL_MS: u64 = 30_000;

/// 默认三档间隔（毫秒）
pub fn compute_interval(visible: bool, active: bool) -> u64 {
    match (visible, active) {
        (false, _) => HIDDEN_INTERVAL_MS,
        (true, true) => ACTIVE_INTERVAL_MS,
        (true, false) => IDLE_INTERVAL_MS,
    }
}

/// 可配置的间隔策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPolicy {
    active: Duration,
    idle: Duration,
    hidden: Duration,
}

impl IntervalPolicy {
    pub fn from_config(config: &IntervalConfig) -> Self {
        Self {
            active: Duration::from_millis(config.active_ms),
            idle: Duration::from_millis(config.idle_ms),
            hidden: Duration::from_millis(config.hidden_ms),
        }
    }

    pub fn compute(&self, visible: bool, active: bool) -> Duration {
        match (visible, active) {
            (false, _) => self.hidden,
            (true, true) => self.active,
            (true, false) => self.idle,
        }
    }
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self::from_config(&IntervalConfig::default())
    }
}
