//! 交易流水实体

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::enums::TransactionStatus;

/// 交易流水
///
/// 每次到达发放步骤的兑换尝试写入一条，创建后不再修改（仅追加）。
/// 这是"该领奖人是否已在活动中获奖"的唯一权威来源。
/// `sequence_no` 是该领奖人在该活动中的第 N 次成功兑换，
/// (claimant_id, campaign_id, sequence_no) 上的部分唯一索引
/// 保证并发请求中至多一个成功写入。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub claimant_id: Uuid,
    pub organization_id: Uuid,
    pub campaign_id: Uuid,
    /// 非兑换码触发的奖励（trigger 文本流程）此字段为空
    pub code_id: Option<i64>,
    pub amount: i64,
    pub sequence_no: i32,
    pub status: TransactionStatus,
    /// 外部渠道的原始响应，用于审计和对账
    pub provider_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
