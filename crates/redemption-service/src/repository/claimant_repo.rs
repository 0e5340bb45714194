//! 领奖人仓储

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Claimant, LastReward};

const CLAIMANT_COLUMNS: &str = r#"
    id, phone_number, full_name, payment_address, shipping_address,
    custom_fields, merchant_id, last_reward, created_at, updated_at
"#;

/// 领奖人仓储
pub struct ClaimantRepository {
    pool: PgPool,
}

impl ClaimantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按手机号查找
    pub async fn get_by_phone(&self, phone: &str) -> Result<Option<Claimant>> {
        let row = sqlx::query_as::<_, Claimant>(&format!(
            "SELECT {} FROM claimants WHERE phone_number = $1",
            CLAIMANT_COLUMNS
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// 按手机号查找，不存在则创建
    ///
    /// 并发创建同一手机号时通过 ON CONFLICT 收敛到同一行，
    /// 保证返回的始终是该手机号的唯一记录。
    pub async fn find_or_create(
        &self,
        phone: &str,
        full_name: Option<&str>,
        merchant_id: Option<Uuid>,
    ) -> Result<Claimant> {
        let row = sqlx::query_as::<_, Claimant>(&format!(
            r#"
            INSERT INTO claimants (phone_number, full_name, merchant_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (phone_number) DO UPDATE SET updated_at = NOW()
            RETURNING {}
            "#,
            CLAIMANT_COLUMNS
        ))
        .bind(phone)
        .bind(full_name)
        .bind(merchant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// 更新商户绑定（最后写入者胜出）
    pub async fn update_merchant_binding(
        &self,
        claimant_id: Uuid,
        merchant_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE claimants
            SET merchant_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(claimant_id)
        .bind(merchant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 更新收货信息
    ///
    /// 礼品流程在发货前落库收货地址并合并自定义字段。
    pub async fn update_shipping_details(
        &self,
        claimant_id: Uuid,
        shipping_address: &str,
        custom_fields: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE claimants
            SET shipping_address = $2,
                custom_fields = custom_fields || $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(claimant_id)
        .bind(shipping_address)
        .bind(custom_fields)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 更新最近一次获奖缓存
    ///
    /// 纯冗余数据，写失败不应影响兑换结果，由调用方决定是否忽略错误。
    pub async fn update_last_reward(
        &self,
        claimant_id: Uuid,
        last_reward: &LastReward,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE claimants
            SET last_reward = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(claimant_id)
        .bind(serde_json::to_value(last_reward)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
