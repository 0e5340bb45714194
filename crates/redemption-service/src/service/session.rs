//! 会话状态存储
//!
//! 会话前端（聊天菜单）在调用引擎前分多轮收集领奖人信息，
//! 其进度必须存放在多实例共享的带 TTL 键值存储中，而不是进程内
//! 的全局 Map——任何一个协调器实例都可能接到同一领奖人的下一条消息。
//! 消息去重同理：同一条上游消息可能被投递到不同实例。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use reward_shared::cache::Cache;

use crate::error::Result;

/// 会话状态的默认 TTL：闲置 30 分钟后自动清除
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// 已处理消息标记的 TTL：去重窗口 24 小时
const PROCESSED_MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 单个领奖人的会话进度
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// 会话前端自定义的阶段标识（如 "collect_address"）
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
    /// 已收集的字段
    #[serde(default)]
    pub collected_fields: HashMap<String, String>,
}

/// 会话状态存储
///
/// 以领奖人手机号为键，TTL 到期自动清除。
#[derive(Clone)]
pub struct ChatSessionStore {
    cache: Arc<Cache>,
    session_ttl: Duration,
}

impl ChatSessionStore {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            cache,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(cache: Arc<Cache>, session_ttl: Duration) -> Self {
        Self { cache, session_ttl }
    }

    fn session_key(phone: &str) -> String {
        format!("session:chat:{}", phone)
    }

    fn message_key(message_id: &str) -> String {
        format!("session:msg:{}", message_id)
    }

    /// 读取会话进度
    #[instrument(skip(self))]
    pub async fn get(&self, phone: &str) -> Result<Option<ChatSession>> {
        Ok(self.cache.get(&Self::session_key(phone)).await?)
    }

    /// 写入会话进度（刷新 TTL）
    #[instrument(skip(self, session))]
    pub async fn put(&self, phone: &str, session: &ChatSession) -> Result<()> {
        self.cache
            .set(&Self::session_key(phone), session, self.session_ttl)
            .await?;
        Ok(())
    }

    /// 清除会话（兑换完成或用户放弃）
    #[instrument(skip(self))]
    pub async fn clear(&self, phone: &str) -> Result<()> {
        self.cache.delete(&Self::session_key(phone)).await?;
        Ok(())
    }

    /// 标记消息已处理
    ///
    /// 原子 SET NX：返回 true 表示首次处理，false 表示该消息
    /// 已被某个实例处理过，调用方应丢弃。
    #[instrument(skip(self))]
    pub async fn mark_message_processed(&self, message_id: &str) -> Result<bool> {
        Ok(self
            .cache
            .set_nx(&Self::message_key(message_id), &true, PROCESSED_MESSAGE_TTL)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reward_shared::config::RedisConfig;

    fn store() -> ChatSessionStore {
        let config = RedisConfig {
            url: std::env::var("TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/1".to_string()),
            pool_size: 2,
        };
        ChatSessionStore::new(Arc::new(Cache::new(&config).unwrap()))
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(
            ChatSessionStore::session_key("13800001111"),
            "session:chat:13800001111"
        );
        assert_eq!(
            ChatSessionStore::message_key("wamid.123"),
            "session:msg:wamid.123"
        );
    }

    #[test]
    fn test_session_serialization_roundtrip() {
        let mut session = ChatSession {
            stage: "collect_address".to_string(),
            campaign_id: Some(Uuid::new_v4()),
            collected_fields: HashMap::new(),
        };
        session
            .collected_fields
            .insert("size".to_string(), "XL".to_string());

        let json = serde_json::to_string(&session).unwrap();
        let parsed: ChatSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_session_lifecycle() {
        let store = store();
        let phone = reward_shared::test_utils::test_phone_number();

        assert!(store.get(&phone).await.unwrap().is_none());

        let session = ChatSession {
            stage: "collect_upi".to_string(),
            campaign_id: None,
            collected_fields: HashMap::new(),
        };
        store.put(&phone, &session).await.unwrap();
        assert_eq!(store.get(&phone).await.unwrap(), Some(session));

        store.clear(&phone).await.unwrap();
        assert!(store.get(&phone).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_message_dedup() {
        let store = store();
        let message_id = format!("wamid.{}", Uuid::new_v4());

        assert!(store.mark_message_processed(&message_id).await.unwrap());
        // 第二次标记返回 false，表示重复投递
        assert!(!store.mark_message_processed(&message_id).await.unwrap());
    }
}
