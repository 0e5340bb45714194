//! 商户实体

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::enums::MerchantStatus;

/// 商户
///
/// 商户返现活动中的收款方，与领奖人是不同的角色。
/// 一个商户至多绑定一个活动上下文。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Merchant {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub payment_address: Option<String>,
    pub merchant_code: Option<String>,
    pub status: MerchantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    /// 是否可以接收现金打款
    pub fn can_receive_payout(&self) -> bool {
        self.status == MerchantStatus::Active && self.payment_address.is_some()
    }
}
