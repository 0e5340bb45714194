//! 统一基础设施错误模块
//!
//! 定义各 crate 共享的基础设施层错误类型，使用 thiserror 提供良好的错误信息。
//! 业务层错误由各服务 crate 自行定义并通过 `From` 转换。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 缓存错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("缓存未命中: {key}")]
    CacheMiss { key: String },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 基础设施 Result 类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 检查是否为可重试的瞬时错误
    ///
    /// 数据库与 Redis 的连接类故障可能自愈，配置错误与内部错误不可重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Redis(_))
    }
}
