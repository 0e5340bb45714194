//! 发码任务 Worker
//!
//! 轮询 provisioning_jobs 表中 pending 状态的任务，为活动批量生成
//! 兑换码。使用 `FOR UPDATE SKIP LOCKED` 保证多实例部署时任务不会被
//! 重复消费。
//!
//! ## 失败语义
//!
//! - 活动或组织记录缺失：终态失败（重试无法修复缺失的父记录），
//!   标记 failed 并留下错误信息供运营排查
//! - 瞬时故障（数据库不可用等）：指数退避后重新入队，超过重试
//!   预算后搁置（parked）等待人工介入
//! - 任务可安全重跑：generated_count 记录进度，重跑只补足缺口，
//!   不会超出请求数量重复生成

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use reward_shared::config::WorkerConfig;
use reward_shared::observability::metrics;

use crate::codegen;
use crate::error::{ProvisioningError, Result};

/// 瞬时失败重试间隔基数（秒），实际间隔 = 2^attempt_count * 60
const RETRY_INTERVAL_BASE_SECS: i64 = 60;

/// 从数据库领取的待处理任务
#[derive(Debug, sqlx::FromRow)]
struct ClaimedJob {
    id: i64,
    campaign_id: Uuid,
    organization_id: Uuid,
    code_count: i32,
    assignments: Option<serde_json::Value>,
    generated_count: i32,
    attempt_count: i32,
}

/// 批量导入的预分配项
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assignment {
    phone: String,
    #[serde(default)]
    full_name: Option<String>,
    /// 预设兑换码，缺省时生成
    #[serde(default)]
    preset_code: Option<String>,
}

/// 发码 Worker
///
/// 以固定间隔轮询数据库，领取并执行 pending 状态的发码任务。
/// 每次循环只领取一个任务，处理完毕后再取下一个。
pub struct ProvisioningWorker {
    pool: PgPool,
    poll_interval: Duration,
    max_attempts: i32,
    /// 批量插入兑换码的分片大小
    chunk_size: usize,
}

impl ProvisioningWorker {
    pub fn new(pool: PgPool, config: &WorkerConfig) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            max_attempts: config.max_attempts,
            chunk_size: config.insert_chunk_size,
        }
    }

    /// 主循环：持续轮询待处理任务直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            max_attempts = self.max_attempts,
            chunk_size = self.chunk_size,
            "ProvisioningWorker 已启动"
        );

        loop {
            if let Err(e) = self.process_next_job().await {
                error!(error = %e, "发码任务处理出错");
            }

            metrics::set_worker_last_run("provisioning_worker");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 尝试领取一个待处理任务并执行
    ///
    /// 在事务内以 `FOR UPDATE SKIP LOCKED` 抢占任务并标记 processing，
    /// 领取与状态变更是原子操作；实际处理在事务外执行，
    /// 避免长事务占用行锁。
    async fn process_next_job(&self) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, ClaimedJob>(
            r#"
            SELECT id, campaign_id, organization_id, code_count,
                   assignments, generated_count, attempt_count
            FROM provisioning_jobs
            WHERE status = 'PENDING' AND next_run_at <= NOW()
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let job = match job {
            Some(j) => j,
            None => return Ok(()),
        };

        info!(
            job_id = job.id,
            campaign_id = %job.campaign_id,
            code_count = job.code_count,
            resumed_from = job.generated_count,
            "领取到发码任务"
        );

        sqlx::query(
            "UPDATE provisioning_jobs SET status = 'PROCESSING', updated_at = NOW() WHERE id = $1",
        )
        .bind(job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.execute_job(&job).await;

        Ok(())
    }

    /// 执行任务并按失败类型收尾
    async fn execute_job(&self, job: &ClaimedJob) {
        let start = Instant::now();

        let status = match self.provision(job).await {
            Ok(()) => {
                info!(
                    job_id = job.id,
                    campaign_id = %job.campaign_id,
                    duration_secs = start.elapsed().as_secs_f64(),
                    "发码任务完成"
                );
                "completed"
            }
            Err(e) if e.is_terminal() => {
                // 父记录缺失等终态失败，必须让运营看到
                error!(
                    job_id = job.id,
                    campaign_id = %job.campaign_id,
                    error = %e,
                    "发码任务终态失败，等待运营介入"
                );
                self.mark_failed(job.id, "FAILED", &e.to_string()).await;
                "failed"
            }
            Err(e) => {
                self.schedule_retry(job, &e.to_string()).await;
                "retried"
            }
        };

        metrics::record_provisioning_job(status, start.elapsed().as_secs_f64());
    }

    /// 任务主体：校验父记录 -> 生成/导入兑换码 -> 原子收尾
    #[instrument(skip(self, job), fields(job_id = job.id, campaign_id = %job.campaign_id))]
    async fn provision(&self, job: &ClaimedJob) -> Result<()> {
        if job.code_count <= 0 {
            return Err(ProvisioningError::InvalidJob(format!(
                "code_count 必须为正数: {}",
                job.code_count
            )));
        }

        // 父记录校验：缺失即终态失败
        let campaign_exists: Option<(String,)> =
            sqlx::query_as("SELECT status FROM campaigns WHERE id = $1")
                .bind(job.campaign_id)
                .fetch_optional(&self.pool)
                .await?;
        if campaign_exists.is_none() {
            return Err(ProvisioningError::MissingParent(format!(
                "campaign {}",
                job.campaign_id
            )));
        }

        let organization_exists: Option<(i64,)> =
            sqlx::query_as("SELECT code_balance FROM organizations WHERE id = $1")
                .bind(job.organization_id)
                .fetch_optional(&self.pool)
                .await?;
        if organization_exists.is_none() {
            return Err(ProvisioningError::MissingParent(format!(
                "organization {}",
                job.organization_id
            )));
        }

        match &job.assignments {
            Some(raw) => {
                let assignments: Vec<Assignment> = serde_json::from_value(raw.clone())?;
                self.provision_assigned(job, &assignments).await?;
            }
            None => {
                self.provision_anonymous(job).await?;
            }
        }

        self.finalize(job).await
    }

    /// 普通发码：生成 code_count 个未分配的兑换码
    ///
    /// 存量码集合每个任务只加载一次；跨任务竞争由插入时的
    /// ON CONFLICT DO NOTHING 兜底——缺口在下一轮补足。
    async fn provision_anonymous(&self, job: &ClaimedJob) -> Result<()> {
        let mut existing = codegen::load_existing_codes(&self.pool).await?;
        let mut generated_total = job.generated_count;

        while generated_total < job.code_count {
            let remaining = (job.code_count - generated_total) as usize;
            let batch = codegen::generate_batch(&mut existing, remaining.min(self.chunk_size));

            let inserted = self.insert_code_batch(job, &batch).await?;
            if inserted < batch.len() as i32 {
                // 并行任务抢先插入了相同的码，缺口由下一轮重新生成补足
                warn!(
                    job_id = job.id,
                    attempted = batch.len(),
                    inserted,
                    "兑换码插入存在跨任务冲突，继续补足"
                );
            }

            generated_total += inserted;
            self.update_progress(job.id, generated_total).await?;
        }

        Ok(())
    }

    /// 批量导入发码：为每个手机号 upsert 领奖人并插入预分配的码
    ///
    /// 从 generated_count 处续跑，重跑不会重复处理已完成的条目。
    async fn provision_assigned(&self, job: &ClaimedJob, assignments: &[Assignment]) -> Result<()> {
        if assignments.len() as i32 != job.code_count {
            return Err(ProvisioningError::InvalidJob(format!(
                "assignments 数量 ({}) 与 code_count ({}) 不一致",
                assignments.len(),
                job.code_count
            )));
        }

        let mut existing = codegen::load_existing_codes(&self.pool).await?;
        let mut processed = job.generated_count;

        for assignment in assignments.iter().skip(job.generated_count as usize) {
            if assignment.phone.trim().is_empty() {
                return Err(ProvisioningError::InvalidJob(
                    "assignments 中存在空手机号".to_string(),
                ));
            }

            sqlx::query(
                r#"
                INSERT INTO claimants (phone_number, full_name)
                VALUES ($1, $2)
                ON CONFLICT (phone_number)
                    DO UPDATE SET full_name = COALESCE(claimants.full_name, EXCLUDED.full_name),
                                  updated_at = NOW()
                "#,
            )
            .bind(assignment.phone.trim())
            .bind(&assignment.full_name)
            .execute(&self.pool)
            .await?;

            let code = match &assignment.preset_code {
                Some(preset) => preset.clone(),
                None => codegen::generate_batch(&mut existing, 1).remove(0),
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO codes (code, campaign_id, organization_id, assigned_to)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (code) DO NOTHING
                "#,
            )
            .bind(&code)
            .bind(job.campaign_id)
            .bind(job.organization_id)
            .bind(assignment.phone.trim())
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 0 {
                self.verify_existing_assignment(job, &code, assignment.phone.trim())
                    .await?;
            }

            processed += 1;
            // 每个分片边界与末尾刷新进度
            if processed as usize % self.chunk_size == 0 || processed == job.code_count {
                self.update_progress(job.id, processed).await?;
            }
        }

        Ok(())
    }

    /// 预分配码冲突时的幂等校验
    ///
    /// 重跑场景下该码已由上一轮写入：归属一致则视为已完成；
    /// 被其他活动或其他手机号占用则是配置错误，终态失败。
    async fn verify_existing_assignment(
        &self,
        job: &ClaimedJob,
        code: &str,
        phone: &str,
    ) -> Result<()> {
        let row: Option<(Uuid, Option<String>)> =
            sqlx::query_as("SELECT campaign_id, assigned_to FROM codes WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((campaign_id, assigned_to))
                if campaign_id == job.campaign_id && assigned_to.as_deref() == Some(phone) =>
            {
                Ok(())
            }
            _ => Err(ProvisioningError::InvalidJob(format!(
                "预设码已被占用: {}",
                code
            ))),
        }
    }

    /// 批量插入兑换码，返回实际插入的行数
    async fn insert_code_batch(&self, job: &ClaimedJob, codes: &[String]) -> Result<i32> {
        let result = sqlx::query(
            r#"
            INSERT INTO codes (code, campaign_id, organization_id)
            SELECT unnest($1::text[]), $2, $3
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(codes)
        .bind(job.campaign_id)
        .bind(job.organization_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as i32)
    }

    /// 刷新任务进度（重跑时的续跑点）
    async fn update_progress(&self, job_id: i64, generated_count: i32) -> Result<()> {
        sqlx::query(
            "UPDATE provisioning_jobs SET generated_count = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(generated_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 原子收尾：扣减组织额度 + 活动流转 Ready + 任务完成
    ///
    /// 三个写入在同一事务中提交。活动流转带状态条件，
    /// 只从 Pending/Processing 推进，绝不回退已激活的活动。
    async fn finalize(&self, job: &ClaimedJob) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE organizations
            SET code_balance = code_balance - $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.organization_id)
        .bind(job.code_count as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'READY', updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(job.campaign_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE provisioning_jobs
            SET status = 'COMPLETED', generated_count = code_count,
                error_message = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// 瞬时失败：退避后重新入队，预算耗尽则搁置
    async fn schedule_retry(&self, job: &ClaimedJob, error_message: &str) {
        let next_attempt = job.attempt_count + 1;

        if next_attempt >= self.max_attempts {
            warn!(
                job_id = job.id,
                attempt_count = next_attempt,
                error = error_message,
                "重试预算耗尽，任务搁置"
            );
            self.mark_failed(job.id, "PARKED", error_message).await;
            return;
        }

        let backoff_secs = RETRY_INTERVAL_BASE_SECS * (1_i64 << job.attempt_count);
        let next_run_at = Utc::now() + chrono::Duration::seconds(backoff_secs);

        warn!(
            job_id = job.id,
            attempt_count = next_attempt,
            backoff_secs,
            error = error_message,
            "瞬时失败，退避后重试"
        );

        let result = sqlx::query(
            r#"
            UPDATE provisioning_jobs
            SET status = 'PENDING', attempt_count = $2, next_run_at = $3,
                error_message = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(next_attempt)
        .bind(next_run_at)
        .bind(error_message)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(job_id = job.id, error = %e, "重新入队失败");
        }
    }

    /// 标记任务为终态（FAILED / PARKED）
    async fn mark_failed(&self, job_id: i64, status: &str, error_message: &str) {
        let result = sqlx::query(
            r#"
            UPDATE provisioning_jobs
            SET status = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(job_id = job_id, error = %e, "标记任务失败状态时出错");
        }
    }
}
