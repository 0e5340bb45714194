//! 兑换码生成
//!
//! 固定前缀 + 随机数字后缀。唯一性检查分两层：
//! 1. 生成时对照一次性加载的存量码集合（每个任务只加载一次，
//!    避免逐候选查询数据库）
//! 2. 落库时依赖 codes.code 的全局唯一约束 + ON CONFLICT DO NOTHING，
//!    这同时覆盖了同活动任务并行执行时的跨任务竞争

use std::collections::HashSet;

use rand::Rng;
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;

/// 兑换码前缀
pub const CODE_PREFIX: &str = "BNTY";

/// 随机后缀的位数
const SUFFIX_DIGITS: u32 = 8;

/// 一次性加载全部存量码
///
/// 注册表级别的全局集合，不是仅本活动的——码的唯一性是全局约束。
pub async fn load_existing_codes(pool: &PgPool) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT code FROM codes")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|(code,)| code).collect())
}

/// 生成一个候选码
fn draw_candidate(rng: &mut impl Rng) -> String {
    let lower = 10_u64.pow(SUFFIX_DIGITS - 1);
    let upper = 10_u64.pow(SUFFIX_DIGITS);
    let suffix: u64 = rng.random_range(lower..upper);
    format!("{}{}", CODE_PREFIX, suffix)
}

/// 生成 count 个新码
///
/// 与存量集合冲突的候选直接丢弃重抽；新生成的码同时加入集合，
/// 保证批内不重复。调用方可多次调用同一集合以增量补足缺口。
pub fn generate_batch(existing: &mut HashSet<String>, count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    let mut generated = Vec::with_capacity(count);

    while generated.len() < count {
        let candidate = draw_candidate(&mut rng);
        if existing.insert(candidate.clone()) {
            generated.push(candidate);
        } else {
            debug!(code = %candidate, "候选码冲突，重新生成");
        }
    }

    generated
}
