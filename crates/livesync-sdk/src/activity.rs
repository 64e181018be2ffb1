//! 用户活跃度追踪
//!
//! 记录最后一次用户交互时间与文档可见性。状态只能通过本模块的入口修改，
//! 其他组件只读。

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::{Clock, EventSource, HostEvent, HostEventKind, Subscription};

/// 默认活跃窗口（毫秒）
pub const ACTIVE_WINDOW_MS: i64 = 30_000;

/// 活跃度状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityState {
    /// 最后一次交互时间（毫秒），从未交互为 None
    pub last_interaction_at: Option<i64>,
    pub is_document_visible: bool,
}

/// 转发给引擎的信号（状态已先行更新）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    Interaction,
    Visibility(bool),
}

pub type ActivityNotify = Arc<dyn Fn(ActivitySignal) + Send + Sync>;

/// 活跃度追踪器
pub struct ActivityTracker {
    state: RwLock<ActivityState>,
    clock: Arc<dyn Clock>,
    active_window_ms: i64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ActivityTracker {
    pub fn new(clock: Arc<dyn Clock>, active_window_ms: i64, visible: bool) -> Self {
        Self {
            state: RwLock::new(ActivityState {
                last_interaction_at: None,
                is_document_visible: visible,
            }),
            clock,
            active_window_ms,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// 记录一次用户交互
    pub fn record_activity(&self) {
        let now = self.clock.now_millis();
        self.state.write().last_interaction_at = Some(now);
    }

    /// 更新可见性，返回是否发生变化
    pub fn set_visible(&self, visible: bool) -> bool {
        let mut state = self.state.write();
        let changed = state.is_document_visible != visible;
        state.is_document_visible = visible;
        changed
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(self.clock.now_millis())
    }

    /// `now - last_interaction_at < active_window`
    pub fn is_active_at(&self, now: i64) -> bool {
        match self.state.read().last_interaction_at {
            Some(at) => now - at < self.active_window_ms,
            None => false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.read().is_document_visible
    }

    pub fn snapshot(&self) -> ActivityState {
        *self.state.read()
    }

    /// 在事件源上注册交互与可见性监听
    ///
    /// 已注册时直接返回 false，不会重复注册。可见性只随后续的可见性事件变化，
    /// 不从事件源回读。
    pub fn attach(self: &Arc<Self>, source: &dyn EventSource, notify: ActivityNotify) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            debug!("活跃度监听已注册，跳过");
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let on_interaction = notify.clone();
        let interaction = source.subscribe(
            HostEventKind::Interaction,
            Arc::new(move |event: HostEvent| {
                if let (Some(tracker), HostEvent::Interaction(_)) = (weak.upgrade(), event) {
                    tracker.record_activity();
                    on_interaction(ActivitySignal::Interaction);
                }
            }),
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let visibility = source.subscribe(
            HostEventKind::VisibilityChange,
            Arc::new(move |event: HostEvent| {
                if let (Some(tracker), HostEvent::VisibilityChanged { visible }) =
                    (weak.upgrade(), event)
                {
                    if tracker.set_visible(visible) {
                        notify(ActivitySignal::Visibility(visible));
                    }
                }
            }),
        );

        subscriptions.push(interaction);
        subscriptions.push(visibility);
        true
    }

    /// 移除全部监听，返回移除数量；可重复调用
    pub fn detach(&self) -> usize {
        let drained: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        let count = drained.len();
        drop(drained);
        count
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }
}
