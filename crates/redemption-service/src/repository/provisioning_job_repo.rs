//! 发码任务仓储
//!
//! 活动创建流程把发码任务写入队列表，后台 Worker 拉取执行。
//! 任务的领取与执行逻辑在 provisioning-worker crate 中。

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// 发码任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningJobStatus {
    /// 等待领取
    Pending,
    /// 执行中
    Processing,
    /// 已完成
    Completed,
    /// 终态失败（父记录缺失等完整性错误，重试无意义）
    Failed,
    /// 重试预算耗尽，搁置等待人工介入
    Parked,
}

/// 发码任务仓储
pub struct ProvisioningJobRepository {
    pool: PgPool,
}

impl ProvisioningJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 入队一个发码任务
    ///
    /// `assignments` 为批量导入场景下的预分配列表
    /// （[{phone, fullName?, presetCode?}]），普通发码时为 None。
    pub async fn enqueue(
        &self,
        campaign_id: Uuid,
        organization_id: Uuid,
        code_count: i32,
        assignments: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO provisioning_jobs
                (campaign_id, organization_id, code_count, assignments)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(campaign_id)
        .bind(organization_id)
        .bind(code_count)
        .bind(assignments)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// 查询任务状态（运营侧轮询）
    pub async fn get_status(&self, job_id: i64) -> Result<Option<ProvisioningJobStatus>> {
        let row: Option<(ProvisioningJobStatus,)> =
            sqlx::query_as("SELECT status FROM provisioning_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(status,)| status))
    }
}
