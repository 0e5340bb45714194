//! 活动实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CampaignStatus, CodeTemplate, RewardType};
use crate::policy::PayoutSchedule;

/// 活动自定义字段要求
///
/// 礼品类活动可以要求领奖人补充若干自定义字段（如尺码、颜色偏好）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldRequirement {
    pub field_name: String,
    #[serde(default)]
    pub required: bool,
}

/// 活动
///
/// `payout_schedule` 与 `custom_field_config` 以 JSONB 存储，
/// 读取时通过 parse 方法转为强类型。阶梯配置在写入时已经过校验，
/// 读取路径的解析失败属于数据损坏，按序列化错误向上传播。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: CampaignStatus,
    pub reward_type: RewardType,
    pub code_template: CodeTemplate,
    pub payout_schedule: serde_json::Value,
    pub fallback_amount: Option<i64>,
    /// 同一领奖人在本活动中的最大成功兑换次数，NULL 表示不限
    pub max_redemptions_per_claimant: Option<i32>,
    pub custom_field_config: serde_json::Value,
    pub trigger_text: Option<String>,
    pub publish_pin: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// 解析阶梯打款配置
    pub fn parse_payout_schedule(&self) -> Result<PayoutSchedule, serde_json::Error> {
        serde_json::from_value(self.payout_schedule.clone())
    }

    /// 解析自定义字段要求
    pub fn parse_custom_fields(&self) -> Result<Vec<CustomFieldRequirement>, serde_json::Error> {
        if self.custom_field_config.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(self.custom_field_config.clone())
    }

    /// 领奖人已成功 prior_count 次后是否还有兑换资格
    pub fn allows_redemption(&self, prior_success_count: i64) -> bool {
        match self.max_redemptions_per_claimant {
            Some(limit) => prior_success_count < limit as i64,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_campaign(schedule: serde_json::Value) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "春季扫码返现".to_string(),
            description: None,
            status: CampaignStatus::Active,
            reward_type: RewardType::Cashback,
            code_template: CodeTemplate::Product,
            payout_schedule: schedule,
            fallback_amount: Some(10),
            max_redemptions_per_claimant: Some(1),
            custom_field_config: json!([]),
            trigger_text: None,
            publish_pin: "482913".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_payout_schedule() {
        let campaign = sample_campaign(json!({
            "1": {"min": 10, "max": 50, "avg": 20}
        }));

        let schedule = campaign.parse_payout_schedule().unwrap();
        assert_eq!(schedule.tier(1).unwrap().avg, 20);
    }

    #[test]
    fn test_parse_custom_fields() {
        let mut campaign = sample_campaign(json!({}));
        campaign.custom_field_config = json!([
            {"fieldName": "size", "required": true},
            {"fieldName": "color"}
        ]);

        let fields = campaign.parse_custom_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields[0].required);
        assert_eq!(fields[0].field_name, "size");
        // required 缺省为 false
        assert!(!fields[1].required);
    }

    #[test]
    fn test_allows_redemption() {
        let mut campaign = sample_campaign(json!({}));

        // 限 1 次：第一次允许，之后拒绝
        assert!(campaign.allows_redemption(0));
        assert!(!campaign.allows_redemption(1));

        // 不限次数
        campaign.max_redemptions_per_claimant = None;
        assert!(campaign.allows_redemption(100));
    }
}
