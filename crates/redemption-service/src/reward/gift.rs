//! 实物礼品策略
//!
//! 发货前校验活动要求的自定义字段与收货地址，缺失即拒绝，
//! 不会发起任何外部调用。

use crate::dispatch::ShipmentRequest;
use crate::error::{RedemptionError, Result};
use crate::models::CustomFieldRequirement;

use super::{RewardContext, RewardPlan};

/// 实物礼品策略
pub struct GiftPolicy {
    required_fields: Vec<CustomFieldRequirement>,
    campaign_name: String,
}

impl GiftPolicy {
    pub fn new(required_fields: Vec<CustomFieldRequirement>, campaign_name: String) -> Self {
        Self {
            required_fields,
            campaign_name,
        }
    }

    /// 校验补充数据并生成发货计划
    pub fn prepare(&self, ctx: &RewardContext<'_>) -> Result<RewardPlan> {
        // 活动要求的必填字段逐个校验
        for field in self.required_fields.iter().filter(|f| f.required) {
            let provided = ctx
                .supplemental
                .custom_fields
                .get(&field.field_name)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);

            if !provided {
                return Err(RedemptionError::RequiredFieldMissing {
                    field: field.field_name.clone(),
                });
            }
        }

        let shipping_address = ctx
            .supplemental
            .shipping_address
            .clone()
            .or_else(|| ctx.claimant.shipping_address.clone())
            .ok_or(RedemptionError::MissingShippingAddress)?;

        let claimant_name = ctx
            .claimant
            .full_name
            .clone()
            .or_else(|| ctx.supplemental.full_name.clone())
            .unwrap_or_else(|| "Recipient".to_string());

        Ok(RewardPlan::Shipment {
            request: ShipmentRequest {
                claimant_name,
                claimant_phone: ctx.claimant.phone_number.clone(),
                shipping_address,
                custom_fields: ctx.supplemental.custom_fields.clone(),
                campaign_name: self.campaign_name.clone(),
            },
        })
    }
}
