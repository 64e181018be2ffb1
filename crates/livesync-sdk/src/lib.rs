//! LiveSync SDK - 自适应实时轮询同步引擎
//!
//! 不依赖长连接，通过轮询保持聊天消息（以及聊天室列表）新鲜：
//! - ⏱️ 自适应间隔：活跃 2 秒、空闲 15 秒、页面隐藏时挂起
//! - 🎯 游标对账：只交付上次书签之后的新消息，目标切换即重置
//! - 🧹 过期响应丢弃：目标切换后才返回的结果不会污染新目标
//! - 📜 向前翻页：按偏移量加载历史消息
//! - ⚙️ 事件系统：新消息、聊天室更新、错误与调度状态回调
//!
//! 已渲染消息的去重由消费方负责。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use livesync_sdk::{
//!     EngineDeps, LocalEventBus, MemorySessionStore, MountOptions, PollTarget, SyncConfig,
//!     SyncEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .base_url("https://pm.example.com/api")
//!         .build();
//!
//!     let session = Arc::new(MemorySessionStore::new());
//!     session.set("access_token", "secret");
//!
//!     let host = LocalEventBus::new(true);
//!     let deps = EngineDeps::http(&config, session, Arc::new(host.clone()))?;
//!     let engine = SyncEngine::mount(config, MountOptions::new(PollTarget::messages(42)), deps)?;
//!
//!     engine.events().on_new_messages(|batch| {
//!         println!("收到 {} 条新消息", batch.messages.len());
//!     });
//!
//!     // 宿主事件
//!     host.set_visible(false);
//!     host.set_visible(true);
//!
//!     engine.load_more().await;
//!     engine.unmount();
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod host;
pub mod http_client;
pub mod interval;
pub mod lifecycle;
pub mod storage;
pub mod sync;
pub mod version;

pub use activity::{ActivityState, ActivityTracker, ACTIVE_WINDOW_MS};
pub use config::{HttpClientConfig, IntervalConfig, SyncConfig, SyncConfigBuilder};
pub use error::{ErrorKind, LiveSyncError, Result};
pub use events::{
    DeliverySource, EventFilter, EventManager, EventStats, MessageBatch, SyncErrorEvent,
    SyncEvent,
};
pub use fetcher::{
    FetchOutcome, FetchResult, Message, MessageId, MessageQuery, ResourceFetcher, Room, RoomId,
    SkipReason,
};
pub use host::{
    Clock, EventSource, HostEvent, HostEventKind, InteractionKind, LocalEventBus, ManualClock,
    Subscription, SystemClock,
};
pub use http_client::HttpResourceFetcher;
pub use interval::{compute_interval, IntervalPolicy};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use storage::{KvSessionStore, MemorySessionStore, SessionStore, TokenProvider};
pub use sync::{
    Cursor, EngineDeps, MountOptions, PollTarget, SchedulerState, SyncEngine, SyncStats,
    SyncStatus,
};
pub use version::SDK_VERSION;
