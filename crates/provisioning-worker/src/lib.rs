//! 发码 Worker
//!
//! 消费发码任务队列：为活动批量生成全局唯一的兑换码并落库，
//! 扣减组织的可用码额度，最后把活动流转到 Ready 状态。
//! 支持批量导入变体——兑换码在生成时预分配给指定手机号。

pub mod codegen;
pub mod error;
pub mod worker;
