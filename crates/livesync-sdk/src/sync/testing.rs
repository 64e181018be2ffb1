//! 测试用的脚本化拉取器

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{LiveSyncError, Result};
use crate::fetcher::{
    FetchOutcome, FetchResult, Message, MessageQuery, ResourceFetcher, Room, RoomId, SkipReason,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchCall {
    Messages {
        room_id: RoomId,
        query: MessageQuery,
        limit: u32,
    },
    Rooms,
}

enum Scripted {
    Ready(Result<FetchResult>),
    Held(oneshot::Receiver<Result<FetchResult>>),
    HeldSkip(oneshot::Receiver<SkipReason>),
}

/// 按脚本依次返回消息页；脚本为空时返回空页
#[derive(Default)]
pub(crate) struct FakeFetcher {
    calls: Mutex<Vec<FetchCall>>,
    script: Mutex<VecDeque<Scripted>>,
    rooms: Mutex<Vec<Room>>,
    auth_missing: AtomicBool,
}

impl FakeFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_page(&self, page: FetchResult) {
        self.script.lock().push_back(Scripted::Ready(Ok(page)));
    }

    pub(crate) fn push_error(&self, error: LiveSyncError) {
        self.script.lock().push_back(Scripted::Ready(Err(error)));
    }

    /// 下一次消息拉取挂起，直到通过返回的 Sender 放行
    pub(crate) fn hold(&self) -> oneshot::Sender<Result<FetchResult>> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().push_back(Scripted::Held(rx));
        tx
    }

    /// 下一次消息拉取挂起，放行后以跳过结束
    pub(crate) fn hold_skip(&self) -> oneshot::Sender<SkipReason> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().push_back(Scripted::HeldSkip(rx));
        tx
    }

    pub(crate) fn set_rooms(&self, rooms: Vec<Room>) {
        *self.rooms.lock() = rooms;
    }

    pub(crate) fn set_auth_missing(&self, missing: bool) {
        self.auth_missing.store(missing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn last_query(&self) -> Option<MessageQuery> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            FetchCall::Messages { query, .. } => Some(*query),
            FetchCall::Rooms => None,
        })
    }
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch_messages(
        &self,
        room_id: RoomId,
        query: MessageQuery,
        limit: u32,
    ) -> Result<FetchOutcome<FetchResult>> {
        if self.auth_missing.load(Ordering::SeqCst) {
            return Ok(FetchOutcome::Skipped(SkipReason::AuthMissing));
        }
        self.calls.lock().push(FetchCall::Messages {
            room_id,
            query,
            limit,
        });

        let next = self.script.lock().pop_front();
        let result = match next {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Held(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(LiveSyncError::Network("held fetch dropped".into()))),
            Some(Scripted::HeldSkip(rx)) => {
                let reason = rx.await.unwrap_or(SkipReason::AuthMissing);
                return Ok(FetchOutcome::Skipped(reason));
            }
            None => Ok(FetchResult::default()),
        };
        result.map(FetchOutcome::Fetched)
    }

    async fn fetch_rooms(&self) -> Result<FetchOutcome<Vec<Room>>> {
        if self.auth_missing.load(Ordering::SeqCst) {
            return Ok(FetchOutcome::Skipped(SkipReason::AuthMissing));
        }
        self.calls.lock().push(FetchCall::Rooms);
        Ok(FetchOutcome::Fetched(self.rooms.lock().clone()))
    }
}

pub(crate) fn page(ids: &[u64], has_more: bool, total_count: u64) -> FetchResult {
    FetchResult {
        items: ids.iter().map(|id| Message::new(*id)).collect(),
        has_more,
        total_count,
    }
}

/// 让已就绪的任务跑完
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
