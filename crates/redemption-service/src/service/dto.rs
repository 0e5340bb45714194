//! 服务层数据传输对象
//!
//! 定义引擎与外部协作方交互使用的 DTO，与内部领域模型解耦。
//! 上游（HTTP 层、会话前端）负责格式校验，引擎负责业务校验。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RedemptionError;
use crate::models::{CodeTemplate, CustomFieldRequirement, RewardType};
use crate::policy::PayoutSchedule;
use crate::reward::SupplementalData;

// ==================== 兑换 ====================

/// 兑换请求
///
/// 三种触发方式按优先级取其一：显式兑换码、二维码复合文本
/// （从中提取码后缀）、活动触发文本。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    pub claimant_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_text: Option<String>,
    #[serde(default)]
    pub supplemental_data: SupplementalData,
}

/// 兑换触发方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionTrigger {
    /// 携码触发（显式码或二维码提取）
    Code(String),
    /// 触发文本（无码流程，按文本查活动）
    TriggerText(String),
}

impl RedemptionRequest {
    /// 解析触发方式
    ///
    /// 二维码文本形如 "活动文案-BNTY123456"，取最后一个 '-' 之后的
    /// 部分作为兑换码。
    pub fn resolve_trigger(&self) -> Result<RedemptionTrigger, RedemptionError> {
        if self.claimant_phone.trim().is_empty() {
            return Err(RedemptionError::Validation(
                "claimant_phone 不能为空".to_string(),
            ));
        }

        if let Some(code) = &self.code {
            if code.trim().is_empty() {
                return Err(RedemptionError::Validation("code 不能为空".to_string()));
            }
            return Ok(RedemptionTrigger::Code(code.trim().to_string()));
        }

        if let Some(qr_text) = &self.qr_text {
            let extracted = extract_code_suffix(qr_text);
            if extracted.is_empty() {
                return Err(RedemptionError::Validation(
                    "二维码文本中未找到兑换码".to_string(),
                ));
            }
            return Ok(RedemptionTrigger::Code(extracted));
        }

        if let Some(trigger_text) = &self.trigger_text {
            if trigger_text.trim().is_empty() {
                return Err(RedemptionError::Validation(
                    "trigger_text 不能为空".to_string(),
                ));
            }
            return Ok(RedemptionTrigger::TriggerText(trigger_text.trim().to_string()));
        }

        Err(RedemptionError::Validation(
            "缺少有效的触发方式（code / qrText / triggerText）".to_string(),
        ))
    }
}

fn default_max_redemptions() -> Option<i32> {
    Some(1)
}

/// 从二维码复合文本中提取兑换码后缀
fn extract_code_suffix(qr_text: &str) -> String {
    qr_text
        .rsplit('-')
        .next()
        .unwrap_or(qr_text)
        .trim()
        .to_string()
}

/// 兑换结果
///
/// 对外的结构化结果。已兑换、商户暂停都是非错误的正常结果
/// （HTTP 层应以 200 返回），避免重复扫码的用户看到报错。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionOutcome {
    /// 发放成功
    #[serde(rename_all = "camelCase")]
    Success {
        amount: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact_code: Option<String>,
    },
    /// 已在本活动中兑换过（幂等响应，无新流水）
    AlreadyRedeemed,
    /// 本次不发放（如收款商户暂停），同样不写流水
    #[serde(rename_all = "camelCase")]
    PayoutSkipped { reason: String },
    /// 校验或状态错误，未发生任何状态变更
    #[serde(rename_all = "camelCase")]
    Rejected { code: String, reason: String },
    /// 外部渠道失败，未核销码、无成功流水，调用方可重试整个请求
    #[serde(rename_all = "camelCase")]
    DispatchFailed { reason: String },
}

impl RedemptionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// 指标用的结果标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "SUCCESS",
            Self::AlreadyRedeemed => "ALREADY_REDEEMED",
            Self::PayoutSkipped { .. } => "PAYOUT_SKIPPED",
            Self::Rejected { .. } => "REJECTED",
            Self::DispatchFailed { .. } => "DISPATCH_FAILED",
        }
    }
}

// ==================== 活动运营 ====================

/// 批量导入的领奖人分配项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimantAssignment {
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// 预设兑换码，缺省时由发码任务生成
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_code: Option<String>,
}

/// 创建活动请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub organization_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub reward_type: RewardType,
    #[serde(default)]
    pub code_template: CodeTemplate,
    #[serde(default)]
    pub payout_schedule: PayoutSchedule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_amount: Option<i64>,
    /// 缺省为单次参与；显式传 null 表示不限次数（阶梯逐次推进）
    #[serde(default = "default_max_redemptions")]
    pub max_redemptions_per_claimant: Option<i32>,
    #[serde(default)]
    pub custom_field_config: Vec<CustomFieldRequirement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_text: Option<String>,
    /// 需要生成的兑换码数量
    pub code_count: i32,
    /// 批量导入时的预分配列表（数量以此为准）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignments: Option<Vec<ClaimantAssignment>>,
}

/// 创建活动响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignResponse {
    pub campaign_id: Uuid,
    /// 发布 PIN，Ready -> Active 时必须出示
    pub publish_pin: String,
    /// 发码任务 ID，无需发码时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_job_id: Option<i64>,
}
