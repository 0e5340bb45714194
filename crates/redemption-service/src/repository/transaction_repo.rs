//! 交易流水仓储
//!
//! 流水账仅追加：只有 INSERT 和查询，没有 UPDATE/DELETE。
//! 成功流水的写入携带冲突检测，是防重复发奖的最终防线。

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Transaction, TransactionStatus};

/// 新建流水的输入
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub claimant_id: Uuid,
    pub organization_id: Uuid,
    pub campaign_id: Uuid,
    pub code_id: Option<i64>,
    pub amount: i64,
    pub sequence_no: i32,
    pub status: TransactionStatus,
    pub provider_response: Option<serde_json::Value>,
}

/// 运营导出用的兑换记录行
///
/// 联表查询结果，CSV 格式化由外部消费方完成。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RedemptionExportRow {
    pub claimant_name: Option<String>,
    pub phone_number: String,
    pub payment_address: Option<String>,
    pub code: Option<String>,
    pub amount: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub provider_response: Option<serde_json::Value>,
}

const TRANSACTION_COLUMNS: &str = r#"
    id, claimant_id, organization_id, campaign_id, code_id, amount,
    sequence_no, status, provider_response, created_at
"#;

/// 交易流水仓储
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 写入一条流水
    ///
    /// SUCCESS 流水命中 (claimant, campaign, sequence_no) 部分唯一索引
    /// 冲突时返回 None——表示并发请求已抢先写入，调用方必须回落到
    /// 幂等的"已兑换"响应。FAILED 流水不参与该索引，总能写入。
    pub async fn insert(&self, txn: &NewTransaction) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO transactions
                (claimant_id, organization_id, campaign_id, code_id, amount,
                 sequence_no, status, provider_response)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (claimant_id, campaign_id, sequence_no)
                WHERE status = 'SUCCESS'
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(txn.claimant_id)
        .bind(txn.organization_id)
        .bind(txn.campaign_id)
        .bind(txn.code_id)
        .bind(txn.amount)
        .bind(txn.sequence_no)
        .bind(txn.status)
        .bind(&txn.provider_response)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// 查询领奖人在活动中的成功流水数
    pub async fn count_success(&self, claimant_id: Uuid, campaign_id: Uuid) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE claimant_id = $1 AND campaign_id = $2 AND status = 'SUCCESS'
            "#,
        )
        .bind(claimant_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// 查询领奖人在活动中最近一条成功流水
    pub async fn find_success(
        &self,
        claimant_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE claimant_id = $1 AND campaign_id = $2 AND status = 'SUCCESS'
            ORDER BY sequence_no DESC
            LIMIT 1
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(claimant_id)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// 活动维度的成功兑换导出查询（运营报表）
    pub async fn list_success_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<RedemptionExportRow>> {
        let rows = sqlx::query_as::<_, RedemptionExportRow>(
            r#"
            SELECT cl.full_name AS claimant_name,
                   cl.phone_number,
                   cl.payment_address,
                   co.code,
                   t.amount,
                   t.created_at,
                   t.provider_response
            FROM transactions t
            JOIN claimants cl ON cl.id = t.claimant_id
            LEFT JOIN codes co ON co.id = t.code_id
            WHERE t.campaign_id = $1 AND t.status = 'SUCCESS'
            ORDER BY t.created_at ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
