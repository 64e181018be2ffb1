use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{LiveSyncError, Result};

/// 会话存储能力
pub trait SessionStore: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>>;
}

/// 进程内会话存储
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl SessionStore for MemorySessionStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }
}

/// 认证令牌解析器
///
/// 按键名顺序查找，第一个非空值生效。
#[derive(Clone)]
pub struct TokenProvider {
    store: Arc<dyn SessionStore>,
    keys: Vec<String>,
}

impl TokenProvider {
    pub fn new(store: Arc<dyn SessionStore>, keys: Vec<String>) -> Self {
        Self { store, keys }
    }

    pub fn resolve(&self) -> Result<Option<String>> {
        for key in &self.keys {
            if let Some(value) = self.store.get_string(key)? {
                let value = value.trim();
                if !value.is_empty() {
                    debug!("使用会话键 {} 中的令牌", key);
                    return Ok(Some(value.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// 没有令牌时返回 `AuthMissing`
    pub fn require(&self) -> Result<String> {
        self.resolve()?.ok_or(LiveSyncError::AuthMissing)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}
