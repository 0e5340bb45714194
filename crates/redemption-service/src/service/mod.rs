//! 服务层
//!
//! 兑换协调器、活动运营操作与会话状态存储。

pub mod campaign_service;
pub mod dto;
pub mod redemption_service;
pub mod session;

pub use campaign_service::CampaignService;
pub use redemption_service::RedemptionService;
pub use session::{ChatSession, ChatSessionStore};
