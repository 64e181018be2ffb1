//! 资源拉取
//!
//! 定义拉取能力（`ResourceFetcher`）以及响应归一化。后端对列表字段名并不统一：
//! `results` 为规范字段，`messages` / `rooms` 作为兼容字段同样接受。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LiveSyncError, Result};

pub type RoomId = u64;
pub type MessageId = u64;

/// 聊天消息；除 `id` 外对引擎不透明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }
}

/// 聊天室；除 `id` 外对引擎不透明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }
}

/// 一次消息拉取的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub items: Vec<Message>,
    pub has_more: bool,
    pub total_count: u64,
}

impl FetchResult {
    /// 本批次最大的消息 ID
    pub fn max_id(&self) -> Option<MessageId> {
        self.items.iter().map(|m| m.id).max()
    }
}

/// 消息查询方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageQuery {
    /// 只取 ID 大于给定值的消息（升序）
    After(MessageId),
    /// 从偏移量开始取一页
    Offset(u64),
}

/// 跳过拉取的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// 会话中没有令牌（启动阶段常见）
    AuthMissing,
    /// 消息轮询但尚未选中聊天室
    NoRoomSelected,
}

/// 拉取结果：完成或被跳过（跳过不是错误）
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Fetched(T),
    Skipped(SkipReason),
}

impl<T> FetchOutcome<T> {
    pub fn fetched(self) -> Option<T> {
        match self {
            FetchOutcome::Fetched(value) => Some(value),
            FetchOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FetchOutcome::Skipped(_))
    }
}

/// 资源拉取能力
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// 拉取某个聊天室的一页消息
    async fn fetch_messages(
        &self,
        room_id: RoomId,
        query: MessageQuery,
        limit: u32,
    ) -> Result<FetchOutcome<FetchResult>>;

    /// 拉取聊天室列表
    async fn fetch_rooms(&self) -> Result<FetchOutcome<Vec<Room>>>;
}

/// 取出列表字段：优先 `primary`，其次兼容字段 `fallback`
fn take_list<'a>(obj: &'a Map<String, Value>, primary: &str, fallback: &str) -> Option<&'a Vec<Value>> {
    obj.get(primary)
        .and_then(Value::as_array)
        .or_else(|| obj.get(fallback).and_then(Value::as_array))
}

fn decode_items<T>(list: &[Value], what: &str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    list.iter()
        .map(|item| {
            serde_json::from_value(item.clone()).map_err(|e| {
                LiveSyncError::MalformedResponse(format!("{} 条目解析失败: {}", what, e))
            })
        })
        .collect()
}

/// 归一化消息分页响应
pub fn normalize_message_page(body: &Value) -> Result<FetchResult> {
    let obj = body
        .as_object()
        .ok_or_else(|| LiveSyncError::MalformedResponse("消息响应不是 JSON 对象".to_string()))?;
    let list = take_list(obj, "results", "messages").ok_or_else(|| {
        LiveSyncError::MalformedResponse("消息响应缺少 results/messages 列表".to_string())
    })?;
    let items: Vec<Message> = decode_items(list, "消息")?;

    Ok(FetchResult {
        items,
        has_more: obj.get("has_more").and_then(Value::as_bool).unwrap_or(false),
        total_count: obj.get("total_count").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// 归一化聊天室列表响应
pub fn normalize_rooms(body: &Value) -> Result<Vec<Room>> {
    let obj = body
        .as_object()
        .ok_or_else(|| LiveSyncError::MalformedResponse("聊天室响应不是 JSON 对象".to_string()))?;
    let list = take_list(obj, "results", "rooms").ok_or_else(|| {
        LiveSyncError::MalformedResponse("聊天室响应缺少 results/rooms 列表".to_string())
    })?;
    decode_items(list, "聊天室")
}
