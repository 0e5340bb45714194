//! 领奖人实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 最近一次获奖信息
///
/// 冗余缓存，便于会话前端快速展示；资格判定永远以流水账为准。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReward {
    pub campaign_id: Uuid,
    pub amount: i64,
    /// 领奖人当时补充的附加信息（收货地址、自定义字段等）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// 领奖人
///
/// 以手机号为主键身份。商户绑定采用最后写入者胜出语义：
/// 扫到带商户的码时覆盖绑定（这是有意的简化，非追加式）。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Claimant {
    pub id: Uuid,
    pub phone_number: String,
    pub full_name: Option<String>,
    /// UPI 风格的收款地址
    pub payment_address: Option<String>,
    pub shipping_address: Option<String>,
    pub custom_fields: serde_json::Value,
    pub merchant_id: Option<Uuid>,
    pub last_reward: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claimant {
    /// 解析最近一次获奖缓存
    pub fn parse_last_reward(&self) -> Option<LastReward> {
        self.last_reward
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
