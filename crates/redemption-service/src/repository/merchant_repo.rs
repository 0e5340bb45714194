//! 商户仓储

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Merchant;

const MERCHANT_COLUMNS: &str = r#"
    id, campaign_id, organization_id, name, phone, email,
    payment_address, merchant_code, status, created_at, updated_at
"#;

/// 商户仓储
pub struct MerchantRepository {
    pool: PgPool,
}

impl MerchantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取单个商户
    pub async fn get(&self, id: Uuid) -> Result<Option<Merchant>> {
        let row = sqlx::query_as::<_, Merchant>(&format!(
            "SELECT {} FROM merchants WHERE id = $1",
            MERCHANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// 列出活动下的所有商户（运营导出）
    pub async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<Merchant>> {
        let rows = sqlx::query_as::<_, Merchant>(&format!(
            "SELECT {} FROM merchants WHERE campaign_id = $1 ORDER BY created_at ASC",
            MERCHANT_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
