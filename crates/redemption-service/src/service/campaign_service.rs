//! 活动运营服务
//!
//! 面向运营侧的活动操作：创建（生成发布 PIN 并入队发码任务）、
//! 发布（PIN 校验 + Ready -> Active）、阶梯配置读写、报表查询。
//! 报表只暴露底层查询，CSV 格式化由外部消费方完成。

use rand::Rng;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{RedemptionError, Result};
use crate::models::{Campaign, CampaignStatus, Merchant};
use crate::policy::PayoutSchedule;
use crate::repository::{
    CampaignRepository, MerchantRepository, NewCampaign, ProvisioningJobRepository,
    RedemptionExportRow, TransactionRepository,
};
use crate::service::dto::{CreateCampaignRequest, CreateCampaignResponse};

/// 活动运营服务
pub struct CampaignService {
    campaign_repo: CampaignRepository,
    merchant_repo: MerchantRepository,
    transaction_repo: TransactionRepository,
    provisioning_repo: ProvisioningJobRepository,
}

impl CampaignService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            campaign_repo: CampaignRepository::new(pool.clone()),
            merchant_repo: MerchantRepository::new(pool.clone()),
            transaction_repo: TransactionRepository::new(pool.clone()),
            provisioning_repo: ProvisioningJobRepository::new(pool),
        }
    }

    /// 创建活动
    ///
    /// 活动以 Pending 状态落库，发布 PIN 在创建时生成并返回给操作员。
    /// 需要兑换码时同步入队发码任务，由后台 Worker 异步执行，
    /// 完成后活动流转到 Ready。
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_campaign(
        &self,
        request: CreateCampaignRequest,
    ) -> Result<CreateCampaignResponse> {
        // 阶梯配置在写入时严格校验
        request.payout_schedule.validate()?;

        let code_count = match &request.assignments {
            Some(assignments) => assignments.len() as i32,
            None => request.code_count,
        };
        if code_count < 0 {
            return Err(RedemptionError::Validation(
                "code_count 不能为负数".to_string(),
            ));
        }

        let publish_pin = generate_publish_pin();

        let campaign_id = self
            .campaign_repo
            .create(&NewCampaign {
                organization_id: request.organization_id,
                name: request.name.clone(),
                description: request.description.clone(),
                reward_type: request.reward_type,
                code_template: request.code_template,
                payout_schedule: serde_json::to_value(&request.payout_schedule)?,
                fallback_amount: request.fallback_amount,
                max_redemptions_per_claimant: request.max_redemptions_per_claimant,
                custom_field_config: serde_json::to_value(&request.custom_field_config)?,
                trigger_text: request.trigger_text.clone(),
                publish_pin: publish_pin.clone(),
            })
            .await?;

        let provisioning_job_id = if code_count > 0 {
            let assignments = request
                .assignments
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;

            let job_id = self
                .provisioning_repo
                .enqueue(
                    campaign_id,
                    request.organization_id,
                    code_count,
                    assignments.as_ref(),
                )
                .await?;
            Some(job_id)
        } else {
            None
        };

        info!(
            campaign_id = %campaign_id,
            code_count,
            job_id = ?provisioning_job_id,
            "活动已创建"
        );

        Ok(CreateCampaignResponse {
            campaign_id,
            publish_pin,
            provisioning_job_id,
        })
    }

    /// 发布活动（Ready -> Active）
    ///
    /// 必须出示创建时生成的发布 PIN。状态流转以条件更新实现，
    /// 并发发布时只有一个请求生效。
    #[instrument(skip(self, pin))]
    pub async fn publish(&self, campaign_id: Uuid, pin: &str) -> Result<()> {
        let campaign = self.get_campaign(campaign_id).await?;

        if campaign.status != CampaignStatus::Ready {
            return Err(RedemptionError::InvalidStatusTransition {
                from: campaign.status.as_str().to_string(),
                to: CampaignStatus::Active.as_str().to_string(),
            });
        }

        if campaign.publish_pin != pin {
            return Err(RedemptionError::InvalidPublishPin);
        }

        let updated = self
            .campaign_repo
            .update_status_if(campaign_id, CampaignStatus::Ready, CampaignStatus::Active)
            .await?;

        if !updated {
            return Err(RedemptionError::ConcurrencyConflict);
        }

        info!(campaign_id = %campaign_id, "活动已发布");
        Ok(())
    }

    /// 结束活动（Active -> Completed）
    #[instrument(skip(self))]
    pub async fn complete(&self, campaign_id: Uuid) -> Result<()> {
        let campaign = self.get_campaign(campaign_id).await?;

        if !campaign
            .status
            .can_transition_to(CampaignStatus::Completed)
        {
            return Err(RedemptionError::InvalidStatusTransition {
                from: campaign.status.as_str().to_string(),
                to: CampaignStatus::Completed.as_str().to_string(),
            });
        }

        let updated = self
            .campaign_repo
            .update_status_if(campaign_id, campaign.status, CampaignStatus::Completed)
            .await?;

        if !updated {
            return Err(RedemptionError::ConcurrencyConflict);
        }

        info!(campaign_id = %campaign_id, "活动已结束");
        Ok(())
    }

    /// 更新阶梯打款配置
    ///
    /// 写入前校验每档 min <= avg <= max，任一档违规即整体拒绝。
    #[instrument(skip(self, schedule))]
    pub async fn update_payout_schedule(
        &self,
        campaign_id: Uuid,
        schedule: &PayoutSchedule,
    ) -> Result<()> {
        schedule.validate()?;

        let updated = self
            .campaign_repo
            .update_payout_schedule(campaign_id, &serde_json::to_value(schedule)?)
            .await?;

        if !updated {
            return Err(RedemptionError::CampaignNotFound(campaign_id.to_string()));
        }

        info!(campaign_id = %campaign_id, tiers = schedule.len(), "阶梯配置已更新");
        Ok(())
    }

    /// 读取阶梯打款配置
    pub async fn get_payout_schedule(&self, campaign_id: Uuid) -> Result<PayoutSchedule> {
        let campaign = self.get_campaign(campaign_id).await?;
        Ok(campaign.parse_payout_schedule()?)
    }

    /// 活动的成功兑换明细（运营导出底层查询）
    pub async fn export_redemptions(&self, campaign_id: Uuid) -> Result<Vec<RedemptionExportRow>> {
        // 确认活动存在，避免对不存在的活动返回空列表造成误判
        self.get_campaign(campaign_id).await?;
        self.transaction_repo
            .list_success_by_campaign(campaign_id)
            .await
    }

    /// 活动的商户列表（运营导出底层查询）
    pub async fn export_merchants(&self, campaign_id: Uuid) -> Result<Vec<Merchant>> {
        self.get_campaign(campaign_id).await?;
        self.merchant_repo.list_by_campaign(campaign_id).await
    }

    /// 查询发码任务状态（运营侧轮询活动是否就绪）
    pub async fn provisioning_status(
        &self,
        job_id: i64,
    ) -> Result<Option<crate::repository::ProvisioningJobStatus>> {
        self.provisioning_repo.get_status(job_id).await
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.campaign_repo
            .get(campaign_id)
            .await?
            .ok_or_else(|| RedemptionError::CampaignNotFound(campaign_id.to_string()))
    }
}

/// 生成发布 PIN
///
/// 格式: 6 位数字
fn generate_publish_pin() -> String {
    let n: u32 = rand::rng().random_range(100000..1000000);
    n.to_string()
}
