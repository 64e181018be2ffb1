//! HTTP 客户端模块 - REST 资源拉取
//!
//! 使用 reqwest 作为底层 HTTP 客户端，实现 `ResourceFetcher`：
//! - `GET {base}/rooms/{room_id}/messages?limit=N&after_id=X`（或 `&offset=N`）
//! - `GET {base}/rooms/`
//!
//! 会话中没有令牌时直接跳过，不发请求、不报错。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::HttpClientConfig;
use crate::error::{LiveSyncError, Result};
use crate::fetcher::{
    normalize_message_page, normalize_rooms, FetchOutcome, FetchResult, MessageQuery,
    ResourceFetcher, Room, RoomId, SkipReason,
};
use crate::storage::TokenProvider;
use crate::version;

/// 基于 HTTP 的资源拉取器
pub struct HttpResourceFetcher {
    client: Client,
    base_url: String,
    auth_scheme: String,
    tokens: TokenProvider,
}

impl HttpResourceFetcher {
    /// 创建新的 HTTP 拉取器
    pub fn new(config: &HttpClientConfig, base_url: &str, tokens: TokenProvider) -> Result<Self> {
        let mut builder = Client::builder().user_agent(version::user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| LiveSyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!("✅ HTTP 拉取器已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            auth_scheme: config.auth_scheme.clone(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn messages_url(&self, room_id: RoomId) -> String {
        format!("{}/rooms/{}/messages", self.base_url, room_id)
    }

    fn rooms_url(&self) -> String {
        format!("{}/rooms/", self.base_url)
    }

    /// 取令牌；没有令牌返回 None
    fn token(&self) -> Result<Option<String>> {
        match self.tokens.require() {
            Ok(token) => Ok(Some(token)),
            Err(LiveSyncError::AuthMissing) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 发送请求并解析 JSON 响应体
    async fn send_json(&self, request: RequestBuilder, token: &str) -> Result<Value> {
        let response = request
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", self.auth_scheme, token),
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let response = check_status(response)?;

        response
            .json::<Value>()
            .await
            .map_err(|e| LiveSyncError::MalformedResponse(format!("响应体不是合法 JSON: {}", e)))
    }
}

/// 非 2xx 转换为 `Http { status, reason }`
fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    warn!("❌ HTTP 请求失败: {} {} ({})", status.as_u16(), reason, response.url());
    Err(LiveSyncError::Http {
        status: status.as_u16(),
        reason,
    })
}

/// 消息查询参数
fn message_params(query: MessageQuery, limit: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", limit.to_string())];
    match query {
        MessageQuery::After(id) => params.push(("after_id", id.to_string())),
        MessageQuery::Offset(offset) => params.push(("offset", offset.to_string())),
    }
    params
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch_messages(
        &self,
        room_id: RoomId,
        query: MessageQuery,
        limit: u32,
    ) -> Result<FetchOutcome<FetchResult>> {
        let Some(token) = self.token()? else {
            debug!("会话中没有令牌，跳过消息拉取: room_id={}", room_id);
            return Ok(FetchOutcome::Skipped(SkipReason::AuthMissing));
        };

        let request = self
            .client
            .get(self.messages_url(room_id))
            .query(&message_params(query, limit));
        let body = self.send_json(request, &token).await?;
        let page = normalize_message_page(&body)?;

        debug!(
            "📥 拉取消息完成: room_id={}, query={:?}, count={}, has_more={}",
            room_id,
            query,
            page.items.len(),
            page.has_more
        );
        Ok(FetchOutcome::Fetched(page))
    }

    async fn fetch_rooms(&self) -> Result<FetchOutcome<Vec<Room>>> {
        let Some(token) = self.token()? else {
            debug!("会话中没有令牌，跳过聊天室拉取");
            return Ok(FetchOutcome::Skipped(SkipReason::AuthMissing));
        };

        let request = self.client.get(self.rooms_url());
        let body = self.send_json(request, &token).await?;
        let rooms = normalize_rooms(&body)?;

        debug!("📥 拉取聊天室完成: count={}", rooms.len());
        Ok(FetchOutcome::Fetched(rooms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySessionStore;
    use std::sync::Arc;

    fn fetcher(base: &str) -> HttpResourceFetcher {
        let store = Arc::new(MemorySessionStore::new());
        let tokens = TokenProvider::new(store, vec!["access_token".into()]);
        HttpResourceFetcher::new(&HttpClientConfig::default(), base, tokens).unwrap()
    }

    #[test]
    fn test_urls() {
        let f = fetcher("https://pm.example.com/api/");
        assert_eq!(f.base_url(), "https://pm.example.com/api");
        assert_eq!(f.messages_url(9), "https://pm.example.com/api/rooms/9/messages");
        assert_eq!(f.rooms_url(), "https://pm.example.com/api/rooms/");
    }

    #[test]
    fn test_message_params() {
        assert_eq!(
            message_params(MessageQuery::After(42), 50),
            vec![("limit", "50".to_string()), ("after_id", "42".to_string())]
        );
        assert_eq!(
            message_params(MessageQuery::Offset(100), 50),
            vec![("limit", "50".to_string()), ("offset", "100".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_token_skips_without_request() {
        // 不可达地址：若真的发请求会返回网络错误
        let f = fetcher("http://127.0.0.1:9");
        let outcome = f
            .fetch_messages(1, MessageQuery::Offset(0), 50)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::AuthMissing));
        assert!(f.fetch_rooms().await.unwrap().is_skipped());
    }
}
