//! 领域模型
//!
//! 数据库实体与枚举类型定义，均支持 sqlx 行映射和 serde 序列化。

mod campaign;
mod claimant;
mod code;
mod enums;
mod merchant;
mod transaction;

pub use campaign::{Campaign, CustomFieldRequirement};
pub use claimant::{Claimant, LastReward};
pub use code::Code;
pub use enums::{CampaignStatus, CodeTemplate, MerchantStatus, RewardType, TransactionStatus};
pub use merchant::Merchant;
pub use transaction::Transaction;
