//! 会话存储
//!
//! - `SessionStore`：按键读取字符串的会话存储能力
//! - `MemorySessionStore`：进程内实现
//! - `KvSessionStore`：基于 sled 的持久化实现
//! - `TokenProvider`：按配置的键名顺序解析认证令牌

pub mod kv;
pub mod session;

pub use kv::KvSessionStore;
pub use session::{MemorySessionStore, SessionStore, TokenProvider};
