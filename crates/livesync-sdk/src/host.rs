//! 宿主环境抽象
//!
//! 引擎不直接依赖浏览器/窗口事件，而是通过注入的能力访问：
//! - `EventSource`：可见性变化与用户交互事件的订阅
//! - `Clock`：当前时间（毫秒）
//!
//! `LocalEventBus` 与 `ManualClock` 是进程内实现，供原生壳和测试使用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

/// 时钟能力
pub trait Clock: Send + Sync {
    /// 当前时间（毫秒）
    fn now_millis(&self) -> i64;
}

/// 系统时钟（UTC 毫秒时间戳）
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 手动推进的时钟
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// 可订阅的宿主事件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    VisibilityChange,
    Interaction,
}

/// 用户交互来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Pointer,
    Key,
    Scroll,
    Touch,
}

/// 宿主事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    VisibilityChanged { visible: bool },
    Interaction(InteractionKind),
}

impl HostEvent {
    pub fn kind(&self) -> HostEventKind {
        match self {
            HostEvent::VisibilityChanged { .. } => HostEventKind::VisibilityChange,
            HostEvent::Interaction(_) => HostEventKind::Interaction,
        }
    }
}

pub type HostEventHandler = Arc<dyn Fn(HostEvent) + Send + Sync>;

/// 订阅句柄
///
/// `unsubscribe()` 可重复调用；drop 时自动取消订阅。
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// 取消订阅，返回本次调用是否真正执行了取消
    pub fn unsubscribe(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// 宿主事件源
pub trait EventSource: Send + Sync {
    /// 订阅某类事件
    fn subscribe(&self, kind: HostEventKind, handler: HostEventHandler) -> Subscription;

    /// 当前文档是否可见
    fn is_visible(&self) -> bool;
}

struct BusInner {
    handlers: Mutex<HashMap<u64, (HostEventKind, HostEventHandler)>>,
    next_id: AtomicU64,
    visible: AtomicBool,
}

/// 进程内事件总线
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<BusInner>,
}

impl LocalEventBus {
    pub fn new(visible: bool) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                visible: AtomicBool::new(visible),
            }),
        }
    }

    /// 派发事件给所有匹配的监听器
    ///
    /// 监听器在锁外调用，允许其在回调中订阅或取消订阅。
    pub fn dispatch(&self, event: HostEvent) -> usize {
        if let HostEvent::VisibilityChanged { visible } = event {
            self.inner.visible.store(visible, Ordering::SeqCst);
        }
        let kind = event.kind();
        let targets: Vec<HostEventHandler> = {
            let handlers = self.inner.handlers.lock();
            handlers
                .values()
                .filter(|(k, _)| *k == kind)
                .map(|(_, h)| h.clone())
                .collect()
        };
        for handler in &targets {
            handler(event);
        }
        targets.len()
    }

    pub fn set_visible(&self, visible: bool) -> usize {
        self.dispatch(HostEvent::VisibilityChanged { visible })
    }

    pub fn interact(&self, kind: InteractionKind) -> usize {
        self.dispatch(HostEvent::Interaction(kind))
    }

    /// 当前注册的监听器数量
    pub fn listener_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventSource for LocalEventBus {
    fn subscribe(&self, kind: HostEventKind, handler: HostEventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.handlers.lock().insert(id, (kind, handler));
        debug!("宿主事件监听已注册: id={}, kind={:?}", id, kind);

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handlers.lock().remove(&id);
                debug!("宿主事件监听已移除: id={}", id);
            }
        })
    }

    fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }
}
