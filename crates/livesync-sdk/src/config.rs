//! 同步引擎配置

use serde::{Deserialize, Serialize};

use crate::error::{LiveSyncError, Result};

/// 轮询间隔配置（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    /// 页面可见且用户活跃
    pub active_ms: u64,
    /// 页面可见但用户空闲
    pub idle_ms: u64,
    /// 页面隐藏
    pub hidden_ms: u64,
    /// 最近一次交互在此窗口内视为活跃
    pub active_window_ms: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            active_ms: 2_000,
            idle_ms: 15_000,
            hidden_ms: 30_000,
            active_window_ms: 30_000,
        }
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒），None 表示使用传输层默认值
    pub request_timeout_secs: Option<u64>,
    /// Authorization 头的认证方案
    pub auth_scheme: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: None,
            auth_scheme: "Bearer".to_string(),
        }
    }
}

/// 同步引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// REST API 根地址
    pub base_url: String,
    /// 每页条数
    pub page_size: u32,
    /// 间隔策略
    pub interval: IntervalConfig,
    /// HTTP 配置
    pub http: HttpClientConfig,
    /// 会话存储中令牌的键名，按顺序查找，第一个存在的生效
    pub token_keys: Vec<String>,
    /// 页面隐藏时挂起轮询；关闭后按 hidden_ms 低频轮询
    pub suspend_when_hidden: bool,
    /// 事件广播通道容量
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            page_size: 50,
            interval: IntervalConfig::default(),
            http: HttpClientConfig::default(),
            token_keys: vec!["access_token".to_string(), "auth_token".to_string()],
            suspend_when_hidden: true,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(LiveSyncError::Config("base_url 不能为空".to_string()));
        }
        if self.page_size == 0 {
            return Err(LiveSyncError::Config("page_size 必须大于 0".to_string()));
        }
        let iv = &self.interval;
        if iv.active_ms == 0 || iv.idle_ms == 0 || iv.hidden_ms == 0 {
            return Err(LiveSyncError::Config("轮询间隔必须大于 0".to_string()));
        }
        if self.token_keys.iter().all(|k| k.trim().is_empty()) {
            return Err(LiveSyncError::Config("token_keys 至少需要一个键名".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(LiveSyncError::Config("event_capacity 必须大于 0".to_string()));
        }
        Ok(())
    }
}

pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn interval(mut self, interval: IntervalConfig) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn http(mut self, http: HttpClientConfig) -> Self {
        self.config.http = http;
        self
    }

    /// 设置令牌键名（按优先级顺序）
    pub fn token_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.token_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn suspend_when_hidden(mut self, suspend: bool) -> Self {
        self.config.suspend_when_hidden = suspend;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_size, 50);
        assert_eq!(config.interval.active_window_ms, 30_000);
        assert_eq!(config.token_keys, vec!["access_token", "auth_token"]);
    }

    #[test]
    fn test_builder_trims_base_url() {
        let config = SyncConfig::builder()
            .base_url("https://pm.example.com/api/")
            .page_size(20)
            .token_keys(["jwt"])
            .build();
        assert_eq!(config.base_url, "https://pm.example.com/api");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.token_keys, vec!["jwt"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_page = SyncConfig::builder().page_size(0).build();
        assert!(matches!(zero_page.validate(), Err(LiveSyncError::Config(_))));

        let zero_interval = SyncConfig::builder()
            .interval(IntervalConfig {
                active_ms: 0,
                ..IntervalConfig::default()
            })
            .build();
        assert!(zero_interval.validate().is_err());

        let no_keys = SyncConfig::builder().token_keys(Vec::<String>::new()).build();
        assert!(no_keys.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let json = serde_json::to_string(&SyncConfig::default()).unwrap();
        let parsed: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.interval, IntervalConfig::default());
        assert!(parsed.suspend_when_hidden);
    }
}
