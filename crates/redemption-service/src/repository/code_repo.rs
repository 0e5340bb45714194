//! 兑换码仓储

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Code;

const CODE_COLUMNS: &str = r#"
    id, code, campaign_id, organization_id, merchant_id, assigned_to,
    is_used, used_by, used_at, created_at
"#;

/// 兑换码仓储
pub struct CodeRepository {
    pool: PgPool,
}

impl CodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按码值查找
    pub async fn get_by_code(&self, code: &str) -> Result<Option<Code>> {
        let row = sqlx::query_as::<_, Code>(&format!(
            "SELECT {} FROM codes WHERE code = $1",
            CODE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// 核销一次性兑换码
    ///
    /// 单条原子条件更新：仅当该码尚未使用时置位。返回 false 表示
    /// 并发请求已抢先核销（或码已被使用），调用方据此走幂等路径。
    pub async fn consume(&self, code_id: i64, used_by: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE codes
            SET is_used = TRUE, used_by = $2, used_at = $3
            WHERE id = $1 AND is_used = FALSE
            "#,
        )
        .bind(code_id)
        .bind(used_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 列出活动下的所有兑换码（运营导出）
    pub async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<Code>> {
        let rows = sqlx::query_as::<_, Code>(&format!(
            "SELECT {} FROM codes WHERE campaign_id = $1 ORDER BY id ASC",
            CODE_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
