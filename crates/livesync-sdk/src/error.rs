use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveSyncError {
    /// 会话中没有可用令牌（启动阶段的正常瞬态，调用方应跳过而非失败）
    #[error("Authentication missing: no session token available")]
    AuthMissing,
    /// 非 2xx 响应
    #[error("HTTP error {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("Network error: {0}")]
    Network(String),
    /// 响应体缺少预期结构
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// 请求完成时目标已切换
    #[error("Stale response discarded")]
    StaleResponse,
    #[error("Config error: {0}")]
    Config(String),
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// 错误分类（对外上报用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthMissing,
    Transport,
    MalformedResponse,
    StaleResponse,
    Internal,
}

impl LiveSyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveSyncError::AuthMissing => ErrorKind::AuthMissing,
            LiveSyncError::Http { .. } | LiveSyncError::Network(_) => ErrorKind::Transport,
            LiveSyncError::MalformedResponse(_) | LiveSyncError::Serialization(_) => {
                ErrorKind::MalformedResponse
            }
            LiveSyncError::StaleResponse => ErrorKind::StaleResponse,
            _ => ErrorKind::Internal,
        }
    }

    /// HTTP 状态码（仅 Http 错误有）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LiveSyncError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 下一次 tick 会自然重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AuthMissing | ErrorKind::Transport | ErrorKind::MalformedResponse
        )
    }
}

impl From<serde_json::Error> for LiveSyncError {
    fn from(error: serde_json::Error) -> Self {
        LiveSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for LiveSyncError {
    fn from(error: std::io::Error) -> Self {
        LiveSyncError::IO(error.to_string())
    }
}

impl From<sled::Error> for LiveSyncError {
    fn from(error: sled::Error) -> Self {
        LiveSyncError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for LiveSyncError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => LiveSyncError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            },
            None => LiveSyncError::Network(error.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LiveSyncError>;
