//! 引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 活动状态
///
/// 状态只允许向前推进：Pending -> Processing -> Ready -> Active -> Completed。
/// Ready -> Active 需要操作员提供创建时生成的发布 PIN。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// 待处理 - 刚创建，兑换码尚未生成
    #[default]
    Pending,
    /// 生成中 - 发码任务执行中
    Processing,
    /// 就绪 - 兑换码已生成，等待发布
    Ready,
    /// 已激活 - 可接受兑换
    Active,
    /// 已结束 - 不再接受兑换
    Completed,
}

impl CampaignStatus {
    /// 状态在生命周期中的序号，用于禁止回退
    fn order(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Ready => 2,
            Self::Active => 3,
            Self::Completed => 4,
        }
    }

    /// 是否允许流转到目标状态
    ///
    /// 只允许向前推进，不允许回退或原地踏步。
    pub fn can_transition_to(&self, target: CampaignStatus) -> bool {
        target.order() > self.order()
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
        }
    }
}

/// 奖励类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    /// 现金返现 - 向收款地址打款
    #[default]
    Cashback,
    /// 实物礼品 - 创建物流发货单
    Gift,
}

/// 兑换码模板
///
/// 决定兑换码的使用方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeTemplate {
    /// 商品码 - 一次性使用，核销后作废
    #[default]
    Product,
    /// 商户码 - 绑定商户，可重复扫描，资格由流水账判定
    Merchant,
}

impl CodeTemplate {
    /// 该模板下的兑换码是否一次性使用
    pub fn is_single_use(&self) -> bool {
        matches!(self, Self::Product)
    }
}

/// 商户状态
///
/// 暂停中的商户会跳过现金打款，但不会使整个兑换失败
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    #[default]
    Active,
    Paused,
}

/// 交易流水状态
///
/// 只有 SUCCESS 流水参与资格判定，FAILED 仅用于审计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    Failed,
}
