//! 现金返现策略
//!
//! 打款目标的优先级：兑换码绑定的商户（商户返现流程）优先于
//! 领奖人本人的收款地址。商户暂停时跳过打款而不是报错——
//! 这是运营侧的预期行为，领奖人不应看到失败。

use rand::Rng;
use tracing::debug;

use crate::dispatch::CashTransferRequest;
use crate::error::{RedemptionError, Result};
use crate::policy::PayoutSchedule;

use super::{RewardContext, RewardPlan};

/// 现金返现策略
pub struct CashbackPolicy {
    schedule: PayoutSchedule,
    fallback_amount: Option<i64>,
}

impl CashbackPolicy {
    pub fn new(schedule: PayoutSchedule, fallback_amount: Option<i64>) -> Self {
        Self {
            schedule,
            fallback_amount,
        }
    }

    /// 校验收款方并生成打款计划
    pub fn prepare(&self, ctx: &RewardContext<'_>) -> Result<RewardPlan> {
        let amount = self
            .schedule
            .resolve_amount(ctx.prior_success_count, self.fallback_amount);

        // 商户绑定的码打款给商户
        if let Some(merchant) = ctx.merchant {
            if !merchant.can_receive_payout() {
                debug!(
                    merchant_id = %merchant.id,
                    status = ?merchant.status,
                    "商户不可收款，跳过打款"
                );
                return Ok(RewardPlan::SkipPayout {
                    reason: "收款商户已暂停，本次不发放现金".to_string(),
                });
            }

            // can_receive_payout 已保证地址存在
            let payment_address = merchant
                .payment_address
                .clone()
                .ok_or_else(|| RedemptionError::MissingPaymentAddress(merchant.name.clone()))?;

            return Ok(RewardPlan::CashTransfer {
                request: CashTransferRequest {
                    payment_address,
                    amount,
                    payee_name: merchant.name.clone(),
                },
                amount,
                artifact_code: generate_discount_code(),
            });
        }

        // 无商户时打款给领奖人本人
        let payment_address = ctx.claimant.payment_address.clone().ok_or_else(|| {
            RedemptionError::MissingPaymentAddress(ctx.claimant.phone_number.clone())
        })?;

        let payee_name = ctx
            .claimant
            .full_name
            .clone()
            .or_else(|| ctx.supplemental.full_name.clone())
            .unwrap_or_else(|| "Beneficiary".to_string());

        Ok(RewardPlan::CashTransfer {
            request: CashTransferRequest {
                payment_address,
                amount,
                payee_name,
            },
            amount,
            artifact_code: generate_discount_code(),
        })
    }
}

/// 生成返现成功后展示给领奖人的折扣码
///
/// 格式: DISC-{4 位数字}
fn generate_discount_code() -> String {
    let n: u32 = rand::rng().random_range(1000..10000);
    format!("DISC-{}", n)
}
