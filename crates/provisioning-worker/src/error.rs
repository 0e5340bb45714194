//! 发码 Worker 错误类型
//!
//! 区分终态失败与瞬时失败：父记录缺失重试无意义，任务直接标记失败
//! 并交由运营处理；数据库抖动等瞬时故障按退避策略重新入队。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("父记录缺失: {0}")]
    MissingParent(String),

    #[error("任务参数非法: {0}")]
    InvalidJob(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务数据反序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProvisioningError>;

impl ProvisioningError {
    /// 终态失败：不重试，标记任务失败并等待人工介入
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MissingParent(_) | Self::InvalidJob(_) | Self::Serialization(_)
        )
    }
}
