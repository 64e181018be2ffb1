//! 同步引擎
//!
//! 职责：
//! - 挂载时注册宿主的可见性与交互监听，卸载或停用时移除
//! - 根据可见性与活跃度决定调度器状态（停止 / 定时 / 挂起）
//! - 定时拉取当前目标，按游标对账后把新批次交给消费方
//! - 丢弃目标切换后才返回的过期响应
//!
//! 所有宿主事件最终都经过同一个调度入口；定时器只在 `rearm()` 中布置。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::{ActivitySignal, ActivityState, ActivityTracker};
use crate::config::SyncConfig;
use crate::error::{LiveSyncError, Result};
use crate::events::{DeliverySource, EventManager, MessageBatch, SyncErrorEvent, SyncEvent};
use crate::fetcher::{
    FetchOutcome, FetchResult, MessageQuery, ResourceFetcher, Room, RoomId, SkipReason,
};
use crate::host::{Clock, EventSource, SystemClock};
use crate::http_client::HttpResourceFetcher;
use crate::interval::IntervalPolicy;
use crate::lifecycle::LifecycleHook;
use crate::storage::{SessionStore, TokenProvider};
use crate::sync::cursor::{Cursor, CursorState};
use crate::sync::scheduler::PollScheduler;
use crate::sync::{PollTarget, SchedulerState};

/// 挂载参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    pub target: PollTarget,
    pub enabled: bool,
}

impl MountOptions {
    pub fn new(target: PollTarget) -> Self {
        Self {
            target,
            enabled: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// 引擎依赖的外部能力
#[derive(Clone)]
pub struct EngineDeps {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub event_source: Arc<dyn EventSource>,
    pub clock: Arc<dyn Clock>,
}

impl EngineDeps {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, event_source: Arc<dyn EventSource>) -> Self {
        Self {
            fetcher,
            event_source,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 使用 HTTP 拉取器，令牌从会话存储读取
    pub fn http(
        config: &SyncConfig,
        store: Arc<dyn SessionStore>,
        event_source: Arc<dyn EventSource>,
    ) -> Result<Self> {
        let tokens = TokenProvider::new(store, config.token_keys.clone());
        let fetcher = HttpResourceFetcher::new(&config.http, &config.base_url, tokens)?;
        Ok(Self::new(Arc::new(fetcher), event_source))
    }
}

/// 对外暴露的状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub instance_id: String,
    pub target: PollTarget,
    pub enabled: bool,
    pub mounted: bool,
    pub is_polling: bool,
    pub scheduler_state: SchedulerState,
    pub last_update_timestamp: Option<i64>,
    pub last_error: Option<String>,
    pub has_more_messages: bool,
    pub total_messages: u64,
    pub cursor: Cursor,
    pub activity: ActivityState,
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub ticks: u64,
    pub fetches: u64,
    pub skipped: u64,
    pub failures: u64,
    pub stale_discards: u64,
    pub rearms: u64,
    pub live_timers: usize,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    fetches: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    stale_discards: AtomicU64,
    rearms: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Messages { room_id: RoomId, query: MessageQuery },
    Rooms,
}

/// 一次拉取的发起上下文，完成时据此判断是否过期
#[derive(Debug, Clone, Copy)]
struct FetchPlan {
    kind: FetchKind,
    epoch: u64,
    run: u64,
    source: DeliverySource,
}

struct EngineState {
    mounted: bool,
    enabled: bool,
    /// 每次进入 Stopped 递增，停用前发起的定时拉取随之失效
    run: u64,
    cursor: CursorState,
    scheduler: PollScheduler,
    last_update_timestamp: Option<i64>,
    last_error: Option<String>,
}

struct EngineInner {
    instance_id: String,
    config: SyncConfig,
    policy: IntervalPolicy,
    fetcher: Arc<dyn ResourceFetcher>,
    event_source: Arc<dyn EventSource>,
    clock: Arc<dyn Clock>,
    tracker: Arc<ActivityTracker>,
    events: EventManager,
    state: Mutex<EngineState>,
    counters: Counters,
    runtime: Handle,
}

/// 自适应轮询同步引擎
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// 挂载引擎；`enabled` 为 true 时立即拉取一次并开始定时
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn mount(config: SyncConfig, options: MountOptions, deps: EngineDeps) -> Result<Arc<Self>> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            LiveSyncError::InvalidOperation(format!("同步引擎需要在 tokio 运行时内挂载: {}", e))
        })?;

        let instance_id = Uuid::new_v4().to_string();
        let tracker = Arc::new(ActivityTracker::new(
            deps.clock.clone(),
            config.interval.active_window_ms as i64,
            deps.event_source.is_visible(),
        ));

        let inner = Arc::new(EngineInner {
            instance_id,
            policy: IntervalPolicy::from_config(&config.interval),
            events: EventManager::new(config.event_capacity),
            fetcher: deps.fetcher,
            event_source: deps.event_source,
            clock: deps.clock,
            tracker,
            state: Mutex::new(EngineState {
                mounted: true,
                enabled: options.enabled,
                run: 0,
                cursor: CursorState::new(options.target),
                scheduler: PollScheduler::new(runtime.clone()),
                last_update_timestamp: None,
                last_error: None,
            }),
            counters: Counters::default(),
            runtime,
            config,
        });

        info!(
            "🚀 同步引擎已挂载: engine={}, target={}, enabled={}",
            inner.instance_id, options.target, options.enabled
        );

        if options.enabled {
            inner.attach_host();
            inner.update("mount", |_| Some(false));
        }

        Ok(Arc::new(Self { inner }))
    }

    /// 启用或停用轮询
    pub fn set_enabled(&self, enabled: bool) {
        let inner = &self.inner;
        if enabled {
            if !inner.state.lock().mounted {
                warn!("引擎已卸载，忽略启用: engine={}", inner.instance_id);
                return;
            }
            inner.attach_host();
        }

        inner.update("set_enabled", |st| {
            if !st.mounted || st.enabled == enabled {
                return None;
            }
            st.enabled = enabled;
            Some(false)
        });

        if !enabled {
            inner.tracker.detach();
        }
    }

    /// 切换同步目标：重置游标，运行中则立即拉取并重新计时
    pub fn on_target_changed(&self, target: PollTarget) {
        let instance_id = self.inner.instance_id.clone();
        self.inner.update("target_changed", |st| {
            if !st.mounted || st.cursor.target() == target {
                return None;
            }
            let from = st.cursor.target();
            let epoch = st.cursor.reset(target);
            info!(
                "🎯 同步目标切换: engine={}, {} -> {}, epoch={}",
                instance_id, from, target, epoch
            );
            Some(true)
        });
    }

    /// 宿主可见性变化（直接调用，与事件源监听等价）
    pub fn on_visibility_change(&self, visible: bool) {
        if self.inner.tracker.set_visible(visible) {
            self.inner.on_signal(ActivitySignal::Visibility(visible));
        }
    }

    /// 用户交互（直接调用，与事件源监听等价）
    pub fn on_activity(&self) {
        self.inner.tracker.record_activity();
        self.inner.on_signal(ActivitySignal::Interaction);
    }

    /// 立即拉取一次，不影响定时节奏；返回结果是否被应用
    pub async fn refresh(&self) -> bool {
        let plan = {
            let mut st = self.inner.state.lock();
            if !st.mounted {
                return false;
            }
            self.inner.plan_fetch(&mut st, DeliverySource::Refresh)
        };
        match plan {
            Some(plan) => self.inner.execute(plan).await,
            None => false,
        }
    }

    /// 向前翻页；没有更多数据时不发请求，返回 false
    pub async fn load_more(&self) -> bool {
        let inner = &self.inner;
        let (room_id, epoch, offset) = {
            let mut st = inner.state.lock();
            if !st.mounted {
                return false;
            }
            let Some(room_id) = st.cursor.target().room_id() else {
                return false;
            };
            let Some(offset) = st.cursor.begin_load_more(inner.config.page_size) else {
                debug!("没有更多消息，跳过加载: engine={}", inner.instance_id);
                return false;
            };
            (room_id, st.cursor.epoch(), offset)
        };

        Counters::bump(&inner.counters.fetches);
        let result = inner
            .fetcher
            .fetch_messages(room_id, MessageQuery::Offset(offset), inner.config.page_size)
            .await;

        inner.complete_load_more(room_id, epoch, result)
    }

    /// 卸载：清除定时器并移除宿主监听；可重复调用，返回本次是否真正卸载
    pub fn unmount(&self) -> bool {
        let inner = &self.inner;
        let mut was_mounted = false;
        inner.update("unmount", |st| {
            if !st.mounted {
                return None;
            }
            st.mounted = false;
            was_mounted = true;
            Some(false)
        });
        let removed = inner.tracker.detach();

        if was_mounted {
            info!(
                "🛑 同步引擎已卸载: engine={}, 移除监听 {} 个",
                inner.instance_id, removed
            );
        }
        was_mounted
    }

    pub fn status(&self) -> SyncStatus {
        let inner = &self.inner;
        let st = inner.state.lock();
        let scheduler_state = st.scheduler.state();
        SyncStatus {
            instance_id: inner.instance_id.clone(),
            target: st.cursor.target(),
            enabled: st.enabled,
            mounted: st.mounted,
            is_polling: scheduler_state.is_armed(),
            scheduler_state,
            last_update_timestamp: st.last_update_timestamp,
            last_error: st.last_error.clone(),
            has_more_messages: st.cursor.has_more(),
            total_messages: st.cursor.total_count(),
            cursor: st.cursor.cursor(),
            activity: inner.tracker.snapshot(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.inner.counters;
        SyncStats {
            ticks: c.ticks.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            stale_discards: c.stale_discards.load(Ordering::Relaxed),
            rearms: c.rearms.load(Ordering::Relaxed),
            live_timers: self.inner.state.lock().scheduler.live_timers(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.inner.state.lock().cursor.cursor()
    }

    pub fn target(&self) -> PollTarget {
        self.inner.state.lock().cursor.target()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.state.lock().scheduler.state()
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler_state().is_armed()
    }

    /// 消费方回调与订阅入口
    pub fn events(&self) -> &EventManager {
        &self.inner.events
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[async_trait]
impl LifecycleHook for SyncEngine {
    async fn on_background(&self) -> Result<()> {
        if !self.inner.state.lock().mounted {
            return Err(LiveSyncError::InvalidOperation("同步引擎已卸载".to_string()));
        }
        self.on_visibility_change(false);
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        if !self.inner.state.lock().mounted {
            return Err(LiveSyncError::InvalidOperation("同步引擎已卸载".to_string()));
        }
        self.on_visibility_change(true);
        Ok(())
    }
}

impl EngineInner {
    /// 注册宿主监听（已注册时不重复）
    fn attach_host(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let attached = self.tracker.attach(
            self.event_source.as_ref(),
            Arc::new(move |signal: ActivitySignal| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_signal(signal);
                }
            }),
        );
        if attached {
            debug!("宿主监听已注册: engine={}", self.instance_id);
        }
    }

    fn on_signal(self: &Arc<Self>, signal: ActivitySignal) {
        let reason = match signal {
            ActivitySignal::Interaction => "activity",
            ActivitySignal::Visibility(true) => "visible",
            ActivitySignal::Visibility(false) => "hidden",
        };
        self.update(reason, |st| st.mounted.then_some(false));
    }

    fn desired_state(&self, st: &EngineState) -> SchedulerState {
        if !st.mounted || !st.enabled {
            return SchedulerState::Stopped;
        }
        let visible = self.tracker.is_visible();
        if !visible && self.config.suspend_when_hidden {
            return SchedulerState::Suspended;
        }
        SchedulerState::Armed(self.policy.compute(visible, self.tracker.is_active()))
    }

    /// 唯一的定时器布置点：清除旧定时器后按新间隔布置
    fn rearm(self: &Arc<Self>, st: &mut EngineState, period: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        st.scheduler.arm(
            period,
            Arc::new(move |generation: u64| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timer_tick(generation);
                }
            }),
        );
        Counters::bump(&self.counters.rearms);
    }

    /// 把调度器推进到期望状态，返回 (from, to)
    fn apply_schedule(
        self: &Arc<Self>,
        st: &mut EngineState,
        force_rearm: bool,
    ) -> (SchedulerState, SchedulerState) {
        let from = st.scheduler.state();
        let to = self.desired_state(st);
        match to {
            SchedulerState::Stopped => {
                if from != SchedulerState::Stopped {
                    st.scheduler.stop();
                    st.run += 1;
                }
            }
            SchedulerState::Suspended => {
                if from != SchedulerState::Suspended {
                    st.scheduler.suspend();
                }
            }
            SchedulerState::Armed(period) => {
                if force_rearm || from != to {
                    self.rearm(st, period);
                }
            }
        }
        (from, to)
    }

    /// 统一调度入口
    ///
    /// `mutate` 返回 None 表示无需处理；`Some(true)` 表示运行中需要立即拉取并重新计时。
    fn update<F>(self: &Arc<Self>, reason: &str, mutate: F)
    where
        F: FnOnce(&mut EngineState) -> Option<bool>,
    {
        let (from, to, plan) = {
            let mut st = self.state.lock();
            let Some(force) = mutate(&mut *st) else {
                return;
            };
            let (from, to) = self.apply_schedule(&mut st, force);
            let fetch_now = to.is_armed() && (force || !from.is_armed());
            let plan = if fetch_now {
                self.plan_fetch(&mut st, DeliverySource::Poll)
            } else {
                None
            };
            (from, to, plan)
        };

        self.report_transition(reason, from, to);
        if let Some(plan) = plan {
            self.spawn_fetch(plan);
        }
    }

    fn on_timer_tick(self: &Arc<Self>, generation: u64) {
        let (from, to, plan) = {
            let mut st = self.state.lock();
            if !st.scheduler.is_current(generation) {
                debug!("忽略过期定时器回调: engine={}, generation={}", self.instance_id, generation);
                return;
            }
            Counters::bump(&self.counters.ticks);
            let plan = self.plan_fetch(&mut st, DeliverySource::Poll);
            let (from, to) = self.apply_schedule(&mut st, false);
            (from, to, plan)
        };

        debug!("⏱️ tick: engine={}, state={:?}", self.instance_id, to);
        self.report_transition("tick", from, to);
        if let Some(plan) = plan {
            self.spawn_fetch(plan);
        }
    }

    fn report_transition(&self, reason: &str, from: SchedulerState, to: SchedulerState) {
        if from == to {
            return;
        }
        info!(
            "🔄 调度状态变更: engine={}, {:?} -> {:?} ({})",
            self.instance_id, from, to, reason
        );
        self.events.emit(SyncEvent::StateChanged {
            from,
            to,
            timestamp: self.clock.now_millis(),
        });
    }

    /// 为当前目标生成拉取计划；未选中聊天室时返回 None
    fn plan_fetch(&self, st: &mut EngineState, source: DeliverySource) -> Option<FetchPlan> {
        let kind = match st.cursor.target() {
            PollTarget::Messages { room_id: Some(room_id) } => FetchKind::Messages {
                room_id,
                query: st.cursor.poll_query(),
            },
            PollTarget::Messages { room_id: None } => {
                self.skip(SkipReason::NoRoomSelected);
                return None;
            }
            PollTarget::Rooms => FetchKind::Rooms,
        };
        Some(FetchPlan {
            kind,
            epoch: st.cursor.epoch(),
            run: st.run,
            source,
        })
    }

    /// 拉取在独立任务中执行，不阻塞定时节奏
    fn spawn_fetch(self: &Arc<Self>, plan: FetchPlan) {
        let inner = self.clone();
        self.runtime.spawn(async move {
            inner.execute(plan).await;
        });
    }

    async fn execute(&self, plan: FetchPlan) -> bool {
        Counters::bump(&self.counters.fetches);
        match plan.kind {
            FetchKind::Messages { room_id, query } => {
                let result = self
                    .fetcher
                    .fetch_messages(room_id, query, self.config.page_size)
                    .await;
                match result {
                    Ok(FetchOutcome::Fetched(page)) => self.apply_messages(plan, room_id, query, page),
                    Ok(FetchOutcome::Skipped(reason)) => self.skip(reason),
                    Err(e) => self.fail(&plan, e),
                }
            }
            FetchKind::Rooms => match self.fetcher.fetch_rooms().await {
                Ok(FetchOutcome::Fetched(rooms)) => self.apply_rooms(plan, rooms),
                Ok(FetchOutcome::Skipped(reason)) => self.skip(reason),
                Err(e) => self.fail(&plan, e),
            },
        }
    }

    fn is_stale(st: &EngineState, plan: &FetchPlan) -> bool {
        !st.mounted
            || !st.cursor.is_current(plan.epoch)
            || (plan.source == DeliverySource::Poll && plan.run != st.run)
    }

    fn discard_stale(&self) -> bool {
        Counters::bump(&self.counters.stale_discards);
        debug!("丢弃过期响应: engine={}", self.instance_id);
        false
    }

    fn skip(&self, reason: SkipReason) -> bool {
        Counters::bump(&self.counters.skipped);
        debug!("拉取已跳过: engine={}, reason={:?}", self.instance_id, reason);
        false
    }

    fn apply_messages(
        &self,
        plan: FetchPlan,
        room_id: RoomId,
        query: MessageQuery,
        page: FetchResult,
    ) -> bool {
        let now = self.clock.now_millis();
        let batch = {
            let mut st = self.state.lock();
            if Self::is_stale(&st, &plan) {
                return self.discard_stale();
            }
            let last_seen = match st.cursor.apply_poll(plan.epoch, query, &page) {
                Ok(last_seen) => last_seen,
                Err(_) => return self.discard_stale(),
            };
            st.last_update_timestamp = Some(now);
            st.last_error = None;
            debug!(
                "📥 消息已对账: engine={}, room_id={}, count={}, last_seen_id={:?}",
                self.instance_id,
                room_id,
                page.items.len(),
                last_seen
            );

            if page.items.is_empty() {
                None
            } else {
                Some(MessageBatch {
                    room_id,
                    messages: page.items,
                    has_more: page.has_more,
                    total_count: page.total_count,
                    source: plan.source,
                    timestamp: now,
                })
            }
        };

        if let Some(batch) = batch {
            self.events.emit(SyncEvent::NewMessages(batch));
        }
        true
    }

    fn apply_rooms(&self, plan: FetchPlan, rooms: Vec<Room>) -> bool {
        let now = self.clock.now_millis();
        {
            let mut st = self.state.lock();
            if Self::is_stale(&st, &plan) {
                return self.discard_stale();
            }
            st.last_update_timestamp = Some(now);
            st.last_error = None;
        }
        debug!("📥 聊天室列表已更新: engine={}, count={}", self.instance_id, rooms.len());
        self.events.emit(SyncEvent::RoomsUpdated {
            rooms,
            timestamp: now,
        });
        true
    }

    /// 可恢复错误：记录并通过事件上报，调度状态不变
    fn fail(&self, plan: &FetchPlan, error: LiveSyncError) -> bool {
        if matches!(error, LiveSyncError::AuthMissing) {
            return self.skip(SkipReason::AuthMissing);
        }
        let target = {
            let mut st = self.state.lock();
            if Self::is_stale(&st, plan) {
                return self.discard_stale();
            }
            st.last_error = Some(error.to_string());
            st.cursor.target()
        };
        self.report_error(target, error);
        false
    }

    fn report_error(&self, target: PollTarget, error: LiveSyncError) {
        Counters::bump(&self.counters.failures);
        if error.is_transient() {
            warn!(
                "❌ 拉取失败，下次定时重试: engine={}, target={}, error={}",
                self.instance_id, target, error
            );
        } else {
            error!(
                "❌ 拉取失败: engine={}, target={}, error={}",
                self.instance_id, target, error
            );
        }
        self.events.emit(SyncEvent::Error(SyncErrorEvent {
            kind: error.kind(),
            message: error.to_string(),
            status: error.status_code(),
            target,
            timestamp: self.clock.now_millis(),
        }));
    }

    fn complete_load_more(
        &self,
        room_id: RoomId,
        epoch: u64,
        result: Result<FetchOutcome<FetchResult>>,
    ) -> bool {
        let now = self.clock.now_millis();
        match result {
            Ok(FetchOutcome::Fetched(page)) => {
                let batch = {
                    let mut st = self.state.lock();
                    if !st.mounted || st.cursor.finish_load_more(epoch, Some(&page)).is_err() {
                        return self.discard_stale();
                    }
                    st.last_update_timestamp = Some(now);
                    st.last_error = None;
                    MessageBatch {
                        room_id,
                        messages: page.items,
                        has_more: page.has_more,
                        total_count: page.total_count,
                        source: DeliverySource::LoadMore,
                        timestamp: now,
                    }
                };
                info!(
                    "📜 加载更多完成: engine={}, room_id={}, count={}, has_more={}",
                    self.instance_id,
                    room_id,
                    batch.messages.len(),
                    batch.has_more
                );
                if !batch.messages.is_empty() {
                    self.events.emit(SyncEvent::NewMessages(batch));
                }
                true
            }
            Ok(FetchOutcome::Skipped(reason)) => {
                if self.state.lock().cursor.finish_load_more(epoch, None).is_err() {
                    return self.discard_stale();
                }
                self.skip(reason)
            }
            Err(error) => {
                let target = {
                    let mut st = self.state.lock();
                    if st.cursor.finish_load_more(epoch, None).is_err() || !st.mounted {
                        return self.discard_stale();
                    }
                    if matches!(error, LiveSyncError::AuthMissing) {
                        drop(st);
                        return self.skip(SkipReason::AuthMissing);
                    }
                    st.last_error = Some(error.to_string());
                    st.cursor.target()
                };
                self.report_error(target, error);
                false
            }
        }
    }
}
