//! 阶梯打款配置
//!
//! 活动的打款金额按领奖次序分档：第 1 次、第 2 次...各对应一个
//! {min, max, avg} 金额区间。配置在写入时严格校验（min <= avg <= max），
//! 读取路径则永不失败——档位缺失时逐级回退到活动兜底金额、再到固定默认值。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RedemptionError, Result};

/// 阶梯全部缺失时的最终兜底金额（1 个货币单位）
pub const DEFAULT_REWARD_AMOUNT: i64 = 1;

/// 单个打款档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTier {
    pub min: i64,
    pub max: i64,
    pub avg: i64,
}

impl PayoutTier {
    /// 档位的实际发放金额
    ///
    /// avg 越界时钳制到 [min, max] 而不是报错：历史配置可能在校验
    /// 上线前写入，读取路径必须对其宽容。
    pub fn clamped_amount(&self) -> i64 {
        self.avg.max(self.min).min(self.max)
    }

    /// 写入时校验：min <= avg <= max 且金额为正
    fn validate(&self, tier_no: u32) -> Result<()> {
        if self.min <= 0 {
            return Err(RedemptionError::InvalidPayoutSchedule(format!(
                "档位 {} 的 min 必须为正数: min={}",
                tier_no, self.min
            )));
        }
        if self.min > self.avg || self.avg > self.max {
            return Err(RedemptionError::InvalidPayoutSchedule(format!(
                "档位 {} 必须满足 min <= avg <= max: min={}, avg={}, max={}",
                tier_no, self.min, self.avg, self.max
            )));
        }
        Ok(())
    }
}

/// 阶梯打款配置
///
/// 以兑换次序号（1, 2, 3...）为键的有序映射。JSON 形式的键为字符串
/// （"1", "2"...），serde 在反序列化时转回整数键。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutSchedule(BTreeMap<u32, PayoutTier>);

impl PayoutSchedule {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 查找指定档位
    pub fn tier(&self, tier_no: u32) -> Option<&PayoutTier> {
        self.0.get(&tier_no)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 写入时校验全部档位
    ///
    /// 任何一档违反 min <= avg <= max 都会拒绝整个配置更新。
    pub fn validate(&self) -> Result<()> {
        for (tier_no, tier) in &self.0 {
            tier.validate(*tier_no)?;
        }
        Ok(())
    }

    /// 解析本次兑换的发放金额（读取路径，永不失败）
    ///
    /// 档位键为 prior_success_count + 1。回退链：
    /// 档位金额（钳制后）-> 活动兜底金额 -> 固定默认值。
    pub fn resolve_amount(&self, prior_success_count: i64, fallback_amount: Option<i64>) -> i64 {
        let tier_no = (prior_success_count + 1).min(u32::MAX as i64) as u32;
        match self.tier(tier_no) {
            Some(tier) => tier.clamped_amount(),
            None => fallback_amount.unwrap_or(DEFAULT_REWARD_AMOUNT),
        }
    }
}
