//! KV 会话存储 - 基于 sled 的持久化会话键值
//!
//! 值以 JSON 编码写入，与进程内会话存储语义一致。

use std::path::{Path, PathBuf};
use std::time::Duration;

use sled::{Db, Tree};
use tracing::{info, warn};

use crate::error::Result;
use crate::storage::session::SessionStore;

const SESSION_TREE: &str = "session";
const OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// 基于 sled 的会话存储
#[derive(Debug)]
pub struct KvSessionStore {
    base_path: PathBuf,
    db: Db,
    tree: Tree,
}

impl KvSessionStore {
    /// 打开（或创建）会话存储
    pub async fn open(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path).await?;
        let db = open_with_retry(&kv_path).await?;
        let tree = db.open_tree(SESSION_TREE)?;

        info!("✅ 会话存储已打开: {}", kv_path.display());

        Ok(Self {
            base_path,
            db,
            tree,
        })
    }

    /// 写入会话值
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tree.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// 删除会话值，返回是否存在
    pub fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.tree.remove(key)?.is_some())
    }

    /// 落盘
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// 文件锁仍被上一个句柄持有
fn is_lock_contention(error: &sled::Error) -> bool {
    let would_block = matches!(error, sled::Error::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock);
    would_block || error.to_string().contains("could not acquire lock")
}

/// 打开 sled；锁冲突时按固定间隔重试，其余错误直接返回
async fn open_with_retry(kv_path: &Path) -> Result<Db> {
    let mut attempt = 1;
    loop {
        match sled::open(kv_path) {
            Ok(db) => return Ok(db),
            Err(e) if attempt < OPEN_ATTEMPTS && is_lock_contention(&e) => {
                warn!(
                    "会话存储被占用，{}ms 后重试 ({}/{}): {}",
                    OPEN_RETRY_INTERVAL.as_millis(),
                    attempt,
                    OPEN_ATTEMPTS,
                    kv_path.display()
                );
                tokio::time::sleep(OPEN_RETRY_INTERVAL).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

impl SessionStore for KvSessionStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
