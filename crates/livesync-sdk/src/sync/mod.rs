//! 自适应轮询同步模块
//!
//! 职责：
//! - 维护当前同步目标与游标（`cursor`）
//! - 持有唯一的重复定时器（`scheduler`）
//! - 根据可见性与活跃度调整轮询间隔，拉取并对账（`engine`）

pub mod cursor;
pub mod engine;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetcher::RoomId;

pub use cursor::{Cursor, CursorState};
pub use engine::{EngineDeps, MountOptions, SyncEngine, SyncStats, SyncStatus};
pub use scheduler::PollScheduler;

/// 同步目标
///
/// 切换聊天室时整体替换，游标随之重置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollTarget {
    /// 某个聊天室的消息；尚未选中聊天室时为 None
    Messages { room_id: Option<RoomId> },
    /// 聊天室列表
    Rooms,
}

impl PollTarget {
    pub fn messages(room_id: RoomId) -> Self {
        PollTarget::Messages {
            room_id: Some(room_id),
        }
    }

    /// 消息轮询但尚未选中聊天室
    pub fn no_room() -> Self {
        PollTarget::Messages { room_id: None }
    }

    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            PollTarget::Messages { room_id } => *room_id,
            PollTarget::Rooms => None,
        }
    }

    pub fn is_messages(&self) -> bool {
        matches!(self, PollTarget::Messages { .. })
    }
}

impl std::fmt::Display for PollTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollTarget::Messages { room_id: Some(id) } => write!(f, "messages(room={})", id),
            PollTarget::Messages { room_id: None } => write!(f, "messages(no room)"),
            PollTarget::Rooms => write!(f, "rooms"),
        }
    }
}

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// 未启用或已卸载
    Stopped,
    /// 定时器以给定间隔运行
    Armed(Duration),
    /// 页面隐藏，定时器已清除
    Suspended,
}

impl SchedulerState {
    pub fn is_armed(&self) -> bool {
        matches!(self, SchedulerState::Armed(_))
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            SchedulerState::Armed(interval) => Some(*interval),
            _ => None,
        }
    }
}
