//! 活动仓储

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Campaign, CampaignStatus, CodeTemplate, RewardType};

/// 创建活动的输入
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub reward_type: RewardType,
    pub code_template: CodeTemplate,
    pub payout_schedule: serde_json::Value,
    pub fallback_amount: Option<i64>,
    pub max_redemptions_per_claimant: Option<i32>,
    pub custom_field_config: serde_json::Value,
    pub trigger_text: Option<String>,
    pub publish_pin: String,
}

const CAMPAIGN_COLUMNS: &str = r#"
    id, organization_id, name, description, status, reward_type, code_template,
    payout_schedule, fallback_amount, max_redemptions_per_claimant,
    custom_field_config, trigger_text, publish_pin, created_at, updated_at
"#;

/// 活动仓储
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取单个活动
    pub async fn get(&self, id: Uuid) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {} FROM campaigns WHERE id = $1",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }

    /// 按触发文本查找活动（会话触发流程）
    pub async fn get_by_trigger_text(&self, trigger_text: &str) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {} FROM campaigns WHERE trigger_text = $1",
            CAMPAIGN_COLUMNS
        ))
        .bind(trigger_text)
        .fetch_optional(&self.pool)
        .await?;

        Ok(campaign)
    }

    /// 创建活动（初始状态 Pending）
    pub async fn create(&self, input: &NewCampaign) -> Result<Uuid> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO campaigns
                (organization_id, name, description, reward_type, code_template,
                 payout_schedule, fallback_amount, max_redemptions_per_claimant,
                 custom_field_config, trigger_text, publish_pin)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(input.organization_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.reward_type)
        .bind(input.code_template)
        .bind(&input.payout_schedule)
        .bind(input.fallback_amount)
        .bind(input.max_redemptions_per_claimant)
        .bind(&input.custom_field_config)
        .bind(&input.trigger_text)
        .bind(&input.publish_pin)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// 条件更新活动状态
    ///
    /// 仅当当前状态等于 expected 时才更新，返回是否更新成功。
    /// 状态机的向前推进以此为原子基元，避免并发下的状态回退。
    pub async fn update_status_if(
        &self,
        id: Uuid,
        expected: CampaignStatus,
        target: CampaignStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(target)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 更新阶梯打款配置
    ///
    /// 调用方（服务层）负责先完成写入时校验。
    pub async fn update_payout_schedule(
        &self,
        id: Uuid,
        payout_schedule: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET payout_schedule = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(payout_schedule)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
