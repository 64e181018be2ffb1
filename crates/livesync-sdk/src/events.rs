//! 事件系统模块 - 同步引擎向上层交付数据
//!
//! 功能包括：
//! - 新消息批次（轮询、加载更多、手动刷新）
//! - 聊天室列表更新
//! - 可恢复错误上报
//! - 调度器状态变更
//! - 广播订阅与按类型注册的监听器
//!
//! 已渲染消息的去重由消费方负责：引擎只保证交付游标之后的新批次。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::ErrorKind;
use crate::fetcher::{Message, Room, RoomId};
use crate::sync::{PollTarget, SchedulerState};

/// 批次来源，便于消费方决定合并还是追加
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverySource {
    /// 定时轮询
    Poll,
    /// 向前翻页（历史消息，应追加）
    LoadMore,
    /// 手动刷新
    Refresh,
}

/// 新消息批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBatch {
    pub room_id: RoomId,
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub total_count: u64,
    pub source: DeliverySource,
    pub timestamp: i64,
}

/// 错误事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub target: PollTarget,
    pub timestamp: i64,
}

/// 同步事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 新消息
    NewMessages(MessageBatch),
    /// 聊天室列表更新
    RoomsUpdated { rooms: Vec<Room>, timestamp: i64 },
    /// 可恢复错误
    Error(SyncErrorEvent),
    /// 调度器状态变更
    StateChanged {
        from: SchedulerState,
        to: SchedulerState,
        timestamp: i64,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::NewMessages(_) => "new_messages",
            SyncEvent::RoomsUpdated { .. } => "rooms_updated",
            SyncEvent::Error(_) => "error",
            SyncEvent::StateChanged { .. } => "state_changed",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::NewMessages(batch) => batch.timestamp,
            SyncEvent::RoomsUpdated { timestamp, .. } => *timestamp,
            SyncEvent::Error(err) => err.timestamp,
            SyncEvent::StateChanged { timestamp, .. } => *timestamp,
        }
    }

    /// 事件关联的聊天室
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            SyncEvent::NewMessages(batch) => Some(batch.room_id),
            SyncEvent::Error(err) => err.target.room_id(),
            _ => None,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    event_types: Option<HashSet<String>>,
    room_ids: Option<HashSet<RoomId>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_room_ids<I: IntoIterator<Item = RoomId>>(mut self, room_ids: I) -> Self {
        self.room_ids = Some(room_ids.into_iter().collect());
        self
    }

    pub fn matches(&self, event: &SyncEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(event.event_type()) {
                return false;
            }
        }
        if let Some(room_ids) = &self.room_ids {
            match event.room_id() {
                Some(room_id) if room_ids.contains(&room_id) => {}
                _ => return false,
            }
        }
        true
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SyncEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SyncEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SyncEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SyncEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 事件监听器映射
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    /// 事件统计
    stats: Mutex<EventStats>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: Mutex::new(EventStats::default()),
        }
    }

    /// 发布事件
    ///
    /// 监听器在锁外调用，可在回调中注册新的监听器。
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.lock();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let targets: Vec<EventListener> = {
            let listeners = self.listeners.read();
            listeners
                .get(event.event_type())
                .into_iter()
                .chain(listeners.get("*"))
                .flat_map(|v| v.iter().cloned())
                .collect()
        };
        for listener in targets {
            listener(&event);
        }
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器（`"*"` 表示全部事件）
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(listener));

        self.stats.lock().listener_count = listeners.values().map(Vec::len).sum();
        info!("Added listener for event type: {}", event_type);
    }

    /// 新消息回调
    pub fn on_new_messages<F>(&self, callback: F)
    where
        F: Fn(&MessageBatch) + Send + Sync + 'static,
    {
        self.add_listener("new_messages", move |event| {
            if let SyncEvent::NewMessages(batch) = event {
                callback(batch);
            }
        });
    }

    /// 聊天室列表回调
    pub fn on_rooms_updated<F>(&self, callback: F)
    where
        F: Fn(&[Room]) + Send + Sync + 'static,
    {
        self.add_listener("rooms_updated", move |event| {
            if let SyncEvent::RoomsUpdated { rooms, .. } = event {
                callback(rooms);
            }
        });
    }

    /// 错误回调
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&SyncErrorEvent) + Send + Sync + 'static,
    {
        self.add_listener("error", move |event| {
            if let SyncEvent::Error(err) = event {
                callback(err);
            }
        });
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.lock().listener_count = 0;
        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn stats(&self) -> EventStats {
        self.stats.lock().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn batch(room_id: RoomId, ids: &[u64]) -> SyncEvent {
        SyncEvent::NewMessages(MessageBatch {
            room_id,
            messages: ids.iter().map(|id| Message::new(*id)).collect(),
            has_more: false,
            total_count: ids.len() as u64,
            source: DeliverySource::Poll,
            timestamp: 1_000,
        })
    }

    #[tokio::test]
    async fn test_event_manager_basic_functionality() {
        let manager = EventManager::new(16);
        let mut receiver = manager.subscribe();

        manager.emit(batch(1, &[43, 44]));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "new_messages");

        let stats = manager.stats();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("new_messages"), Some(&1));
        assert_eq!(stats.last_event_time, Some(1_000));
    }

    #[tokio::test]
    async fn test_event_filter() {
        let manager = EventManager::new(16);
        let filter = EventFilter::new()
            .with_event_types(["new_messages"])
            .with_room_ids([10]);
        let mut filtered = manager.subscribe_filtered(filter);

        manager.emit(batch(11, &[1]));
        manager.emit(SyncEvent::RoomsUpdated {
            rooms: vec![Room::new(10)],
            timestamp: 0,
        });
        manager.emit(batch(10, &[2]));

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.room_id(), Some(10));
        assert!(filtered.try_recv().is_err());
    }

    #[test]
    fn test_typed_callbacks() {
        let manager = EventManager::new(16);
        let delivered = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let d = delivered.clone();
        manager.on_new_messages(move |batch| {
            d.fetch_add(batch.messages.len(), Ordering::SeqCst);
        });
        let e = errors.clone();
        manager.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        let a = all.clone();
        manager.add_listener("*", move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        manager.emit(batch(1, &[1, 2, 3]));
        manager.emit(SyncEvent::Error(SyncErrorEvent {
            kind: ErrorKind::Transport,
            message: "HTTP error 500: Internal Server Error".into(),
            status: Some(500),
            target: PollTarget::messages(1),
            timestamp: 0,
        }));

        assert_eq!(delivered.load(Ordering::SeqCst), 3);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().listener_count, 3);

        manager.clear_listeners();
        manager.emit(batch(1, &[4]));
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }
}
