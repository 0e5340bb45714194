//! 兑换协调服务
//!
//! 处理单次兑换的核心业务流程，包括：
//! - 兑换码 / 活动 / 领奖人三方状态校验
//! - 流水账资格检查（防重复发奖的幂等短路）
//! - 按阶梯规则计算发放金额
//! - 调用外部渠道打款或发货
//! - 恰好一次地记录成功流水
//!
//! ## 兑换流程
//!
//! 1. 解析触发方式 -> 2. 定位兑换码与活动 -> 3. 定位/创建领奖人
//!    -> 4. 分布式锁 -> 5. 资格检查 -> 6. 策略校验与计划生成
//!    -> 7. 外部发放 -> 8. 核销码 + 写流水 + 刷新缓存
//!
//! ## 副作用顺序
//!
//! 外部发放必须先于核销码和写流水：渠道失败时不得留下
//! "奖励已消耗"的痕迹。写成功流水依赖部分唯一索引的冲突检测，
//! 并发竞争的失败方回落到幂等的"已兑换"响应。

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tracing::{info, instrument, warn};

use reward_shared::observability::metrics;

use crate::dispatch::PayoutDispatcher;
use crate::error::{RedemptionError, Result};
use crate::lock::LockManager;
use crate::models::{Campaign, Claimant, Code, LastReward, Merchant, TransactionStatus};
use crate::repository::{
    CampaignRepository, ClaimantRepository, CodeRepository, MerchantRepository, NewTransaction,
    TransactionRepository,
};
use crate::reward::{RewardContext, RewardPlan, RewardPolicy};
use crate::service::dto::{RedemptionOutcome, RedemptionRequest, RedemptionTrigger};

/// 触发解析后的兑换上下文
struct ResolvedRedemption {
    campaign: Campaign,
    code: Option<Code>,
    merchant: Option<Merchant>,
}

/// 兑换协调服务
///
/// 无状态请求处理器，多实例共享同一持久化存储。
pub struct RedemptionService {
    campaign_repo: CampaignRepository,
    code_repo: CodeRepository,
    claimant_repo: ClaimantRepository,
    merchant_repo: MerchantRepository,
    transaction_repo: TransactionRepository,
    dispatcher: Arc<dyn PayoutDispatcher>,
    lock_manager: Arc<LockManager>,
}

impl RedemptionService {
    pub fn new(
        pool: PgPool,
        dispatcher: Arc<dyn PayoutDispatcher>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        Self {
            campaign_repo: CampaignRepository::new(pool.clone()),
            code_repo: CodeRepository::new(pool.clone()),
            claimant_repo: ClaimantRepository::new(pool.clone()),
            merchant_repo: MerchantRepository::new(pool.clone()),
            transaction_repo: TransactionRepository::new(pool),
            dispatcher,
            lock_manager,
        }
    }

    /// 处理一次兑换
    ///
    /// 业务性失败（无效码、活动未激活、缺少必填字段等）收敛为
    /// `Rejected` 结果返回；系统性错误（数据库、锁冲突）以错误
    /// 向上传播，由调用方决定重试。
    #[instrument(skip(self, request), fields(phone = %request.claimant_phone))]
    pub async fn redeem(&self, request: RedemptionRequest) -> Result<RedemptionOutcome> {
        let start = Instant::now();

        let outcome = match self.execute(&request).await {
            Ok(outcome) => Ok(outcome),
            // 重复兑换是幂等的正常结果，不作为拒绝返回
            Err(RedemptionError::AlreadyRedeemed(campaign_id)) => {
                info!(campaign_id = %campaign_id, "重复兑换请求，返回幂等响应");
                Ok(RedemptionOutcome::AlreadyRedeemed)
            }
            Err(e) if e.is_business_error() => {
                info!(code = e.error_code(), error = %e, "兑换被拒绝");
                Ok(RedemptionOutcome::Rejected {
                    code: e.error_code().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        };

        if let Ok(o) = &outcome {
            metrics::record_redemption(o.label(), start.elapsed().as_secs_f64());
            info!(outcome = o.label(), "兑换处理完成");
        }

        outcome
    }

    /// 兑换主流程
    async fn execute(&self, request: &RedemptionRequest) -> Result<RedemptionOutcome> {
        // 1-2. 解析触发方式，定位兑换码与活动
        let trigger = request.resolve_trigger()?;
        let resolved = self.resolve_context(&trigger, &request.claimant_phone).await?;

        // 3. 定位或创建领奖人
        let claimant = self.resolve_claimant(request, &resolved).await?;

        // 4. 分布式锁串行化同一 (活动, 领奖人) 的并发兑换。
        //    锁只消除绝大多数竞争；锁失效（TTL 过期）时由流水表的
        //    唯一索引兜底。
        let lock_key = format!(
            "redeem:{}:{}",
            resolved.campaign.id, claimant.phone_number
        );
        let guard = self.lock_manager.acquire(&lock_key, None).await?;

        let result = self.execute_locked(request, &resolved, &claimant).await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放兑换锁失败，等待 TTL 过期回收");
        }

        result
    }

    /// 定位兑换码、活动与绑定商户
    async fn resolve_context(
        &self,
        trigger: &RedemptionTrigger,
        claimant_phone: &str,
    ) -> Result<ResolvedRedemption> {
        let (campaign, code) = match trigger {
            RedemptionTrigger::Code(raw_code) => {
                let code = self
                    .code_repo
                    .get_by_code(raw_code)
                    .await?
                    .ok_or_else(|| RedemptionError::InvalidCode(raw_code.clone()))?;

                // 一次性码核销后不可再用；商户码可复用，资格由流水判定
                let campaign = self
                    .campaign_repo
                    .get(code.campaign_id)
                    .await?
                    .ok_or_else(|| RedemptionError::CampaignNotFound(raw_code.clone()))?;

                if campaign.code_template.is_single_use() && code.is_used {
                    // 同一领奖人重放已成功的请求是幂等场景，
                    // 其他人使用已核销的码才是状态错误
                    let replayer = self.claimant_repo.get_by_phone(claimant_phone).await?;
                    if let Some(replayer) = replayer
                        && code.used_by == Some(replayer.id)
                    {
                        return Err(RedemptionError::AlreadyRedeemed(campaign.id));
                    }
                    return Err(RedemptionError::CodeAlreadyUsed(raw_code.clone()));
                }

                // 批量导入预分配的码只允许被分配人使用
                if !code.is_assigned_to(claimant_phone) {
                    return Err(RedemptionError::CodeNotAssigned {
                        code: raw_code.clone(),
                        claimant_phone: claimant_phone.to_string(),
                    });
                }

                (campaign, Some(code))
            }
            RedemptionTrigger::TriggerText(text) => {
                let campaign = self
                    .campaign_repo
                    .get_by_trigger_text(text)
                    .await?
                    .ok_or_else(|| RedemptionError::CampaignNotFound(text.clone()))?;
                (campaign, None)
            }
        };

        if !campaign.status.is_active() {
            return Err(RedemptionError::CampaignNotActive {
                campaign_id: campaign.id,
                status: campaign.status.as_str().to_string(),
            });
        }

        // 兑换码绑定的商户必须存在且属于同一活动
        let merchant = match code.as_ref().and_then(|c| c.merchant_id) {
            Some(merchant_id) => {
                let merchant = self
                    .merchant_repo
                    .get(merchant_id)
                    .await?
                    .ok_or(RedemptionError::MerchantNotFound(merchant_id))?;

                if merchant.campaign_id != Some(campaign.id) {
                    return Err(RedemptionError::MerchantCampaignMismatch {
                        merchant_id,
                        campaign_id: campaign.id,
                    });
                }
                Some(merchant)
            }
            None => None,
        };

        Ok(ResolvedRedemption {
            campaign,
            code,
            merchant,
        })
    }

    /// 定位或创建领奖人，并维护商户绑定
    ///
    /// 兑换码携带商户且与领奖人现有绑定不同时覆盖绑定
    /// （最后写入者胜出，有意的简化）。
    async fn resolve_claimant(
        &self,
        request: &RedemptionRequest,
        resolved: &ResolvedRedemption,
    ) -> Result<Claimant> {
        let merchant_id = resolved.merchant.as_ref().map(|m| m.id);

        let claimant = self
            .claimant_repo
            .find_or_create(
                &request.claimant_phone,
                request.supplemental_data.full_name.as_deref(),
                merchant_id,
            )
            .await?;

        if let Some(mid) = merchant_id
            && claimant.merchant_id != Some(mid)
        {
            self.claimant_repo
                .update_merchant_binding(claimant.id, Some(mid))
                .await?;
        }

        Ok(claimant)
    }

    /// 锁内执行：资格检查 -> 策略 -> 发放 -> 记录
    async fn execute_locked(
        &self,
        request: &RedemptionRequest,
        resolved: &ResolvedRedemption,
        claimant: &Claimant,
    ) -> Result<RedemptionOutcome> {
        let campaign = &resolved.campaign;

        // 5. 资格检查：流水账是唯一权威
        let prior_success_count = self
            .transaction_repo
            .count_success(claimant.id, campaign.id)
            .await?;

        if !campaign.allows_redemption(prior_success_count) {
            info!(
                campaign_id = %campaign.id,
                prior_success_count,
                "领奖人已达兑换上限，返回幂等响应"
            );
            return Ok(RedemptionOutcome::AlreadyRedeemed);
        }

        // 6. 策略校验与发放计划
        let policy = RewardPolicy::for_campaign(campaign)?;
        let plan = policy.prepare(&RewardContext {
            campaign,
            claimant,
            merchant: resolved.merchant.as_ref(),
            prior_success_count,
            supplemental: &request.supplemental_data,
        })?;

        let sequence_no = (prior_success_count + 1) as i32;

        // 7. 外部发放
        let (dispatch_result, amount, artifact_code) = match plan {
            RewardPlan::SkipPayout { reason } => {
                info!(campaign_id = %campaign.id, reason = %reason, "本次兑换跳过打款");
                return Ok(RedemptionOutcome::PayoutSkipped { reason });
            }
            RewardPlan::CashTransfer {
                request: transfer,
                amount,
                artifact_code,
            } => (
                self.dispatcher.transfer_cash(&transfer).await,
                amount,
                Some(artifact_code),
            ),
            RewardPlan::Shipment { request: shipment } => {
                // 发货前落库收货信息，供物流回查
                self.claimant_repo
                    .update_shipping_details(
                        claimant.id,
                        &shipment.shipping_address,
                        &serde_json::to_value(&shipment.custom_fields)?,
                    )
                    .await?;
                (self.dispatcher.create_shipment(&shipment).await, 0, None)
            }
        };

        let response = match dispatch_result {
            Ok(response) if response.success => response,
            Ok(response) => {
                // 渠道明确拒绝：写 FAILED 审计流水（不参与资格判定），
                // 不核销码
                let reason = response.declined_reason();
                self.write_failed_audit(resolved, claimant, amount, sequence_no, &response)
                    .await;
                warn!(campaign_id = %campaign.id, reason = %reason, "外部渠道拒绝发放");
                return Ok(RedemptionOutcome::DispatchFailed { reason });
            }
            Err(e @ RedemptionError::DependencyUnavailable { .. }) => {
                // 传输层故障：无确定性响应可记录，不写流水不核销码
                warn!(campaign_id = %campaign.id, error = %e, "外部渠道不可达");
                return Ok(RedemptionOutcome::DispatchFailed {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        // 8. 发放成功后的记录：核销码 -> 写成功流水 -> 刷新缓存
        if let Some(code) = &resolved.code
            && campaign.code_template.is_single_use()
        {
            let consumed = self.code_repo.consume(code.id, claimant.id).await?;
            if !consumed {
                // 锁应当已阻止并发核销；走到这里说明锁曾失效
                warn!(code = %code.code, "兑换码已被并发核销，以流水索引为准继续");
            }
        }

        let inserted = self
            .transaction_repo
            .insert(&NewTransaction {
                claimant_id: claimant.id,
                organization_id: campaign.organization_id,
                campaign_id: campaign.id,
                code_id: resolved.code.as_ref().map(|c| c.id),
                amount,
                sequence_no,
                status: TransactionStatus::Success,
                provider_response: Some(response.provider_response.clone()),
            })
            .await?;

        if inserted.is_none() {
            // 唯一索引冲突：并发请求已抢先写入成功流水。
            // 回落到幂等响应——这正是锁失效场景下索引兜底的语义。
            warn!(
                campaign_id = %campaign.id,
                claimant_id = %claimant.id,
                sequence_no,
                "成功流水写入冲突，回落幂等响应"
            );
            return Ok(RedemptionOutcome::AlreadyRedeemed);
        }

        // 最近获奖缓存是冗余数据，写失败只记警告
        if let Err(e) = self
            .claimant_repo
            .update_last_reward(
                claimant.id,
                &LastReward {
                    campaign_id: campaign.id,
                    amount,
                    details: Some(serde_json::to_value(&request.supplemental_data)?),
                },
            )
            .await
        {
            warn!(claimant_id = %claimant.id, error = %e, "刷新最近获奖缓存失败");
        }

        info!(
            campaign_id = %campaign.id,
            claimant_id = %claimant.id,
            amount,
            sequence_no,
            "兑换成功"
        );

        Ok(RedemptionOutcome::Success {
            amount,
            artifact_code,
        })
    }

    /// 写入 FAILED 审计流水（尽力而为）
    async fn write_failed_audit(
        &self,
        resolved: &ResolvedRedemption,
        claimant: &Claimant,
        amount: i64,
        sequence_no: i32,
        response: &crate::dispatch::DispatchResponse,
    ) {
        let result = self
            .transaction_repo
            .insert(&NewTransaction {
                claimant_id: claimant.id,
                organization_id: resolved.campaign.organization_id,
                campaign_id: resolved.campaign.id,
                code_id: resolved.code.as_ref().map(|c| c.id),
                amount,
                sequence_no,
                status: TransactionStatus::Failed,
                provider_response: Some(response.provider_response.clone()),
            })
            .await;

        if let Err(e) = result {
            warn!(
                campaign_id = %resolved.campaign.id,
                error = %e,
                "写入 FAILED 审计流水失败"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MockPayoutDispatcher;
    use crate::reward::SupplementalData;

    /// 构造不触达数据库的服务实例（connect_lazy 不建立连接）
    fn lazy_service(dispatcher: MockPayoutDispatcher) -> RedemptionService {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let lock_manager = Arc::new(LockManager::with_defaults(None, pool.clone()));
        RedemptionService::new(pool, Arc::new(dispatcher), lock_manager)
    }

    #[tokio::test]
    async fn test_missing_trigger_maps_to_rejected() {
        let service = lazy_service(MockPayoutDispatcher::new());

        let outcome = service
            .redeem(RedemptionRequest {
                claimant_phone: "13800001111".to_string(),
                code: None,
                qr_text: None,
                trigger_text: None,
                supplemental_data: SupplementalData::default(),
            })
            .await
            .unwrap();

        match outcome {
            RedemptionOutcome::Rejected { code, .. } => {
                assert_eq!(code, "VALIDATION_ERROR");
            }
            other => panic!("期望 Rejected，实际 {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_phone_maps_to_rejected() {
        let service = lazy_service(MockPayoutDispatcher::new());

        let outcome = service
            .redeem(RedemptionRequest {
                claimant_phone: "".to_string(),
                code: Some("BNTY123456".to_string()),
                qr_text: None,
                trigger_text: None,
                supplemental_data: SupplementalData::default(),
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RedemptionOutcome::Rejected { .. }));
    }

    #[test]
    fn test_lock_key_format() {
        let campaign_id = uuid::Uuid::nil();
        let key = format!("redeem:{}:{}", campaign_id, "13800001111");
        assert_eq!(
            key,
            "redeem:00000000-0000-0000-0000-000000000000:13800001111"
        );
    }
}
