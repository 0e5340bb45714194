//! 兑换码实体

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 兑换码
///
/// `code` 全局唯一（跨活动）。商品码核销后 `is_used` 置位并记录
/// 核销人和时间；商户码永远保持可复用，资格由流水账判定。
/// `assigned_to` 用于批量导入场景：兑换码在生成时就绑定到特定手机号。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Code {
    pub id: i64,
    pub code: String,
    pub campaign_id: Uuid,
    pub organization_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub assigned_to: Option<String>,
    pub is_used: bool,
    pub used_by: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Code {
    /// 预分配的兑换码是否允许该手机号使用
    ///
    /// 未预分配的码对所有人开放。
    pub fn is_assigned_to(&self, phone: &str) -> bool {
        match &self.assigned_to {
            Some(assigned) => assigned == phone,
            None => true,
        }
    }
}
