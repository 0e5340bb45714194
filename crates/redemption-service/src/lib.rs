//! 兑换与奖励发放引擎
//!
//! 营销活动的核心组件：给定一个兑换码和领奖人身份，判定是否可以发奖、
//! 按阶梯规则计算金额、通过外部渠道发放奖励，并将结果恰好一次地写入流水账。
//!
//! 上游的 HTTP 路由、会话鉴权、文件上传等由外部协作方负责，
//! 调用方以校验过的 [`service::dto::RedemptionRequest`] 进入本引擎，
//! 消费结构化的 [`service::dto::RedemptionOutcome`]。

pub mod dispatch;
pub mod error;
pub mod lock;
pub mod models;
pub mod policy;
pub mod repository;
pub mod reward;
pub mod service;
