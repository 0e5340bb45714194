//! 分布式锁
//!
//! 兑换的资格检查与流水写入之间存在先读后写窗口，同一
//! (活动, 领奖人) 的并发请求必须串行化。锁只是性能层面的
//! 串行化手段；正确性的最终防线是流水表上的部分唯一索引。

mod lock_manager;

pub use lock_manager::{LockConfig, LockGuard, LockManager};
