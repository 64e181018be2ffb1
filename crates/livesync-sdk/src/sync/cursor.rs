//! 同步游标
//!
//! 每个目标一个游标：`last_seen_id` 在目标生命周期内单调不减，
//! `page_offset` 只随显式的加载更多前进。目标切换时整体重置并递增 epoch，
//! 携带旧 epoch 的响应一律视为过期。

use serde::{Deserialize, Serialize};

use crate::error::{LiveSyncError, Result};
use crate::fetcher::{FetchResult, MessageId, MessageQuery};
use crate::sync::PollTarget;

/// 同步进度书签
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_seen_id: Option<MessageId>,
    pub page_offset: u64,
}

impl Cursor {
    /// 按最大值规则推进，返回推进后的值
    pub fn observe(&mut self, max_id: Option<MessageId>) -> Option<MessageId> {
        self.last_seen_id = match (self.last_seen_id, max_id) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => old.or(new),
        };
        self.last_seen_id
    }

    /// 定时轮询使用的查询：有书签时只取更新的消息，否则取当前页
    pub fn poll_query(&self) -> MessageQuery {
        match self.last_seen_id {
            Some(id) => MessageQuery::After(id),
            None => MessageQuery::Offset(self.page_offset),
        }
    }
}

/// 目标与游标的归属状态
#[derive(Debug, Clone)]
pub struct CursorState {
    target: PollTarget,
    epoch: u64,
    cursor: Cursor,
    has_more: bool,
    total_count: u64,
    /// 进行中的加载更多（目标偏移量）
    pending_offset: Option<u64>,
}

impl CursorState {
    pub fn new(target: PollTarget) -> Self {
        Self {
            target,
            epoch: 0,
            cursor: Cursor::default(),
            has_more: false,
            total_count: 0,
            pending_offset: None,
        }
    }

    /// 切换目标，返回新的 epoch
    pub fn reset(&mut self, target: PollTarget) -> u64 {
        let epoch = self.epoch + 1;
        *self = Self::new(target);
        self.epoch = epoch;
        epoch
    }

    pub fn target(&self) -> PollTarget {
        self.target
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub fn poll_query(&self) -> MessageQuery {
        self.cursor.poll_query()
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(LiveSyncError::StaleResponse)
        }
    }

    /// 应用一次轮询结果
    ///
    /// 只有按偏移量拉取的页才携带可信的 `has_more`；`total_count` 每次都更新。
    pub fn apply_poll(
        &mut self,
        epoch: u64,
        query: MessageQuery,
        page: &FetchResult,
    ) -> Result<Option<MessageId>> {
        self.ensure_current(epoch)?;
        if matches!(query, MessageQuery::Offset(_)) {
            self.has_more = page.has_more;
        }
        self.total_count = page.total_count;
        Ok(self.cursor.observe(page.max_id()))
    }

    /// 开始加载更多，返回要拉取的偏移量
    ///
    /// 没有更多数据或已有加载进行中时返回 None。
    pub fn begin_load_more(&mut self, page_size: u32) -> Option<u64> {
        if !self.has_more || self.pending_offset.is_some() || !self.target.is_messages() {
            return None;
        }
        let offset = self.cursor.page_offset + u64::from(page_size);
        self.pending_offset = Some(offset);
        Some(offset)
    }

    /// 加载更多完成；`page` 为 None 表示失败，偏移量不前进
    pub fn finish_load_more(&mut self, epoch: u64, page: Option<&FetchResult>) -> Result<()> {
        self.ensure_current(epoch)?;
        let offset = self.pending_offset.take();
        if let (Some(offset), Some(page)) = (offset, page) {
            self.cursor.page_offset = self.cursor.page_offset.max(offset);
            self.cursor.observe(page.max_id());
            self.has_more = page.has_more;
            self.total_count = page.total_count;
        }
        Ok(())
    }

    pub fn is_loading_more(&self) -> bool {
        self.pending_offset.is_some()
    }
}
