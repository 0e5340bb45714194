//! 兑换引擎错误类型
//!
//! 按错误分类法组织：参数校验错误、状态错误、外部依赖错误、完整性错误
//! 与系统错误。校验/状态错误在请求内同步返回；依赖错误允许调用方重试整个
//! 兑换请求；完整性错误需要运营介入，不自动重试。

use thiserror::Error;
use uuid::Uuid;

/// 兑换引擎错误类型
#[derive(Debug, Error)]
pub enum RedemptionError {
    // === 校验错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("缺少收款地址: claimant={0}")]
    MissingPaymentAddress(String),

    #[error("礼品奖励缺少收货地址")]
    MissingShippingAddress,

    #[error("缺少必填自定义字段: {field}")]
    RequiredFieldMissing { field: String },

    #[error("阶梯配置非法: {0}")]
    InvalidPayoutSchedule(String),

    // === 状态错误 ===
    #[error("无效的兑换码: {0}")]
    InvalidCode(String),

    #[error("兑换码已被使用: {0}")]
    CodeAlreadyUsed(String),

    #[error("兑换码未分配给该领奖人: code={code}, claimant={claimant_phone}")]
    CodeNotAssigned { code: String, claimant_phone: String },

    #[error("活动不存在: {0}")]
    CampaignNotFound(String),

    #[error("活动未激活: campaign_id={campaign_id}, status={status}")]
    CampaignNotActive { campaign_id: Uuid, status: String },

    #[error("商户不属于该活动: merchant_id={merchant_id}, campaign_id={campaign_id}")]
    MerchantCampaignMismatch {
        merchant_id: Uuid,
        campaign_id: Uuid,
    },

    #[error("领奖人已在该活动中获奖: campaign_id={0}")]
    AlreadyRedeemed(Uuid),

    #[error("发布 PIN 不正确")]
    InvalidPublishPin,

    #[error("活动状态不允许此流转: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    // === 外部依赖错误 ===
    #[error("外部渠道不可达: channel={channel}, reason={reason}")]
    DependencyUnavailable { channel: String, reason: String },

    #[error("外部渠道返回失败: channel={channel}, reason={reason}")]
    DispatchDeclined { channel: String, reason: String },

    // === 完整性错误 ===
    #[error("组织不存在: {0}")]
    OrganizationNotFound(Uuid),

    #[error("商户不存在: {0}")]
    MerchantNotFound(Uuid),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("锁冲突: {resource}")]
    LockConflict { resource: String },

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,
}

/// 兑换引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, RedemptionError>;

impl RedemptionError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::DependencyUnavailable { .. }
                | Self::LockConflict { .. }
                | Self::ConcurrencyConflict
        )
    }

    /// 检查是否为业务错误（非系统错误）
    ///
    /// 业务错误由调用方以结构化结果消化，系统错误向上传播。
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Redis(_)
                | Self::Internal(_)
                | Self::LockConflict { .. }
                | Self::ConcurrencyConflict
        )
    }

    /// 获取错误码（用于对外响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::MissingPaymentAddress(_) => "MISSING_PAYMENT_ADDRESS",
            Self::MissingShippingAddress => "MISSING_SHIPPING_ADDRESS",
            Self::RequiredFieldMissing { .. } => "REQUIRED_FIELD_MISSING",
            Self::InvalidPayoutSchedule(_) => "INVALID_PAYOUT_SCHEDULE",
            Self::InvalidCode(_) => "INVALID_CODE",
            Self::CodeAlreadyUsed(_) => "CODE_ALREADY_USED",
            Self::CodeNotAssigned { .. } => "CODE_NOT_ASSIGNED",
            Self::CampaignNotFound(_) => "CAMPAIGN_NOT_FOUND",
            Self::CampaignNotActive { .. } => "CAMPAIGN_NOT_ACTIVE",
            Self::MerchantCampaignMismatch { .. } => "MERCHANT_CAMPAIGN_MISMATCH",
            Self::AlreadyRedeemed(_) => "ALREADY_REDEEMED",
            Self::InvalidPublishPin => "INVALID_PUBLISH_PIN",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
            Self::DispatchDeclined { .. } => "DISPATCH_DECLINED",
            Self::OrganizationNotFound(_) => "ORGANIZATION_NOT_FOUND",
            Self::MerchantNotFound(_) => "MERCHANT_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
        }
    }
}

impl From<reward_shared::error::SharedError> for RedemptionError {
    fn from(err: reward_shared::error::SharedError) -> Self {
        use reward_shared::error::SharedError;
        match err {
            SharedError::Database(e) => Self::Database(e),
            SharedError::Redis(e) => Self::Redis(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
