//! 生命周期管理
//!
//! 宿主前后台切换统一转发给注册的 Hook。同步引擎本身实现了 `LifecycleHook`：
//! 切到后台等同于文档不可见，回到前台等同于可见。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;

/// 生命周期回调 Hook
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Background,
    Foreground,
}

/// 生命周期管理器
#[derive(Default)]
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败时记录并继续，最后返回第一个错误
    pub async fn notify_background(&self) -> Result<()> {
        self.notify(Phase::Background).await
    }

    /// 通知所有 Hook：切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        self.notify(Phase::Foreground).await
    }

    async fn notify(&self, phase: Phase) -> Result<()> {
        let label = match phase {
            Phase::Background => "后台",
            Phase::Foreground => "前台",
        };
        info!("🔄 通知所有模块：切换到{}", label);

        let mut first_error = None;
        let mut failed = 0usize;

        for (index, hook) in self.hooks.iter().enumerate() {
            let result = match phase {
                Phase::Background => hook.on_background().await,
                Phase::Foreground => hook.on_foreground().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook #{} {}切换失败: {}", index, label, e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            warn!("⚠️ {} 个模块{}切换失败，但所有模块都已尝试执行", failed, label);
            return Err(e);
        }

        info!("✅ 所有模块{}切换完成", label);
        Ok(())
    }
}
