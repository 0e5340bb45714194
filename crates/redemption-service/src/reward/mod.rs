//! 奖励策略
//!
//! 活动的奖励类型收敛为一个带标签的枚举：现金返现与实物礼品。
//! 每个变体实现同样的"校验 + 生成发放计划"接口，由编译器保证
//! 分支穷尽，替代按模板字符串查表分发的写法。

mod cashback;
mod gift;

pub use cashback::CashbackPolicy;
pub use gift::GiftPolicy;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dispatch::{CashTransferRequest, ShipmentRequest};
use crate::error::Result;
use crate::models::{Campaign, Claimant, Merchant, RewardType};

/// 兑换请求携带的补充数据
///
/// 礼品流程需要收货地址和活动要求的自定义字段；
/// 会话前端在调用引擎前已收集完毕。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplementalData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// 一次兑换的奖励上下文
pub struct RewardContext<'a> {
    pub campaign: &'a Campaign,
    pub claimant: &'a Claimant,
    /// 兑换码绑定的商户（商户返现流程的收款方）
    pub merchant: Option<&'a Merchant>,
    /// 该领奖人在本活动中已有的成功次数，决定打款档位
    pub prior_success_count: i64,
    pub supplemental: &'a SupplementalData,
}

/// 发放计划
///
/// 策略校验通过后产出的待执行动作，由协调器交给外部渠道执行。
#[derive(Debug)]
pub enum RewardPlan {
    /// 现金打款
    CashTransfer {
        request: CashTransferRequest,
        amount: i64,
        /// 成功后展示给领奖人的折扣码
        artifact_code: String,
    },
    /// 礼品发货（流水金额记 0）
    Shipment { request: ShipmentRequest },
    /// 跳过打款（如收款商户已暂停）——区别于失败的成功形结果
    SkipPayout { reason: String },
}

/// 奖励策略
pub enum RewardPolicy {
    Cashback(CashbackPolicy),
    Gift(GiftPolicy),
}

impl RewardPolicy {
    /// 从活动配置构造策略
    ///
    /// 阶梯配置解析失败说明存量数据损坏，按序列化错误向上传播。
    pub fn for_campaign(campaign: &Campaign) -> Result<Self> {
        match campaign.reward_type {
            RewardType::Cashback => Ok(Self::Cashback(CashbackPolicy::new(
                campaign.parse_payout_schedule()?,
                campaign.fallback_amount,
            ))),
            RewardType::Gift => Ok(Self::Gift(GiftPolicy::new(
                campaign.parse_custom_fields()?,
                campaign.name.clone(),
            ))),
        }
    }

    /// 校验上下文并生成发放计划
    pub fn prepare(&self, ctx: &RewardContext<'_>) -> Result<RewardPlan> {
        match self {
            Self::Cashback(policy) => policy.prepare(ctx),
            Self::Gift(policy) => policy.prepare(ctx),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! 策略单元测试共用的实体构造器

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use crate::models::{
        Campaign, CampaignStatus, Claimant, CodeTemplate, Merchant, MerchantStatus, RewardType,
    };

    pub fn campaign(reward_type: RewardType, schedule: serde_json::Value) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "测试活动".to_string(),
            description: None,
            status: CampaignStatus::Active,
            reward_type,
            code_template: CodeTemplate::Product,
            payout_schedule: schedule,
            fallback_amount: Some(5),
            max_redemptions_per_claimant: Some(1),
            custom_field_config: json!([]),
            trigger_text: None,
            publish_pin: "123456".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn claimant(payment_address: Option<&str>) -> Claimant {
        Claimant {
            id: Uuid::new_v4(),
            phone_number: "13800001111".to_string(),
            full_name: Some("测试用户".to_string()),
            payment_address: payment_address.map(String::from),
            shipping_address: None,
            custom_fields: json!({}),
            merchant_id: None,
            last_reward: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn merchant(status: MerchantStatus, payment_address: Option<&str>) -> Merchant {
        Merchant {
            id: Uuid::new_v4(),
            campaign_id: Some(Uuid::new_v4()),
            organization_id: Uuid::new_v4(),
            name: "临街小店".to_string(),
            phone: None,
            email: None,
            payment_address: payment_address.map(String::from),
            merchant_code: None,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
