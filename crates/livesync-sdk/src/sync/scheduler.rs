//! 轮询调度器
//!
//! 持有唯一的重复定时器。重新布置时总是先清除旧定时器再创建新的，
//! 任一时刻每个引擎最多只有一个定时器存活。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::sync::SchedulerState;

/// 定时器回调，参数为布置时的代号
pub type TickCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// 定时器句柄；drop 时中止定时任务
struct SchedulerHandle {
    task: JoinHandle<()>,
    live: Arc<AtomicUsize>,
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 轮询调度器
pub struct PollScheduler {
    state: SchedulerState,
    handle: Option<SchedulerHandle>,
    generation: u64,
    live: Arc<AtomicUsize>,
    runtime: Handle,
}

impl PollScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            state: SchedulerState::Stopped,
            handle: None,
            generation: 0,
            live: Arc::new(AtomicUsize::new(0)),
            runtime,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// 布置定时器，首次触发在一个间隔之后；返回本次布置的代号
    pub fn arm(&mut self, period: Duration, on_tick: TickCallback) -> u64 {
        self.clear();
        let generation = self.generation;
        let start = Instant::now() + period;

        let task = self.runtime.spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                on_tick(generation);
            }
        });

        self.live.fetch_add(1, Ordering::SeqCst);
        self.handle = Some(SchedulerHandle {
            task,
            live: self.live.clone(),
        });
        self.state = SchedulerState::Armed(period);
        debug!("⏱️ 定时器已布置: period={:?}, generation={}", period, generation);
        generation
    }

    /// 清除定时器并挂起
    pub fn suspend(&mut self) {
        self.clear();
        self.state = SchedulerState::Suspended;
    }

    /// 清除定时器并停止；可重复调用
    pub fn stop(&mut self) {
        self.clear();
        self.state = SchedulerState::Stopped;
    }

    /// 回调携带的代号是否仍是当前定时器
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    /// 当前存活的定时器数量
    pub fn live_timers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// 清除旧定时器；代号递增使已触发但尚未处理的回调失效
    fn clear(&mut self) -> bool {
        self.generation += 1;
        self.handle.take().is_some()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}
