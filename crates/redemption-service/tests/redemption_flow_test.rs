//! RedemptionService 集成测试
//!
//! 使用真实 PostgreSQL 和 Redis 验证兑换流程的端到端性质：
//! 至多一次发奖、幂等重放、失败不留痕、商户暂停跳过打款。
//! 外部渠道以内置桩实现替代，可编程其响应并记录调用次数。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... TEST_REDIS_URL=redis://... \
//!   cargo test --test redemption_flow_test -- --ignored
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use redemption_service::dispatch::{
    CashTransferRequest, DispatchResponse, PayoutDispatcher, ShipmentRequest,
};
use redemption_service::error::Result;
use redemption_service::lock::LockManager;
use redemption_service::reward::SupplementalData;
use redemption_service::service::RedemptionService;
use redemption_service::service::dto::{RedemptionOutcome, RedemptionRequest};
use reward_shared::test_utils::{test_code, test_phone_number};

// ==================== 辅助函数 ====================

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

async fn connect() -> PgPool {
    PgPool::connect(&database_url())
        .await
        .expect("数据库连接失败")
}

/// 可编程的渠道桩
///
/// 默认所有调用成功；`fail_transfers` 置位后打款返回渠道拒绝。
struct StubDispatcher {
    fail_transfers: bool,
    transfer_calls: AtomicU32,
    shipment_calls: AtomicU32,
}

impl StubDispatcher {
    fn succeeding() -> Self {
        Self {
            fail_transfers: false,
            transfer_calls: AtomicU32::new(0),
            shipment_calls: AtomicU32::new(0),
        }
    }

    fn declining() -> Self {
        Self {
            fail_transfers: true,
            ..Self::succeeding()
        }
    }
}

#[async_trait]
impl PayoutDispatcher for StubDispatcher {
    async fn transfer_cash(&self, request: &CashTransferRequest) -> Result<DispatchResponse> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transfers {
            Ok(DispatchResponse::declined(
                json!({"reason": "insufficient balance"}),
            ))
        } else {
            Ok(DispatchResponse::succeeded(json!({
                "transfer_id": format!("txn_{}", Uuid::new_v4().simple()),
                "transfer_amount": request.amount,
            })))
        }
    }

    async fn create_shipment(&self, _request: &ShipmentRequest) -> Result<DispatchResponse> {
        self.shipment_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchResponse::succeeded(json!({"shipment_id": "ship_1"})))
    }
}

/// 构建被测服务（数据库锁，避免依赖 Redis）
fn service_with(pool: &PgPool, dispatcher: Arc<StubDispatcher>) -> RedemptionService {
    let lock_manager = Arc::new(LockManager::with_defaults(None, pool.clone()));
    RedemptionService::new(pool.clone(), dispatcher, lock_manager)
}

// ==================== 数据准备 ====================

async fn insert_organization(pool: &PgPool) -> Uuid {
    let row: (Uuid,) = sqlx::query_as(
        "INSERT INTO organizations (name, code_balance) VALUES ($1, 1000) RETURNING id",
    )
    .bind(format!("测试组织-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("插入测试组织失败");
    row.0
}

/// 插入一个 Active 状态的测试活动
async fn insert_campaign(
    pool: &PgPool,
    organization_id: Uuid,
    reward_type: &str,
    payout_schedule: serde_json::Value,
    max_redemptions: Option<i32>,
    custom_field_config: serde_json::Value,
) -> Uuid {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO campaigns
            (organization_id, name, status, reward_type, code_template,
             payout_schedule, fallback_amount, max_redemptions_per_claimant,
             custom_field_config, publish_pin)
        VALUES ($1, $2, 'ACTIVE', $3, 'PRODUCT', $4, NULL, $5, $6, '123456')
        RETURNING id
        "#,
    )
    .bind(organization_id)
    .bind(format!("测试活动-{}", Uuid::new_v4()))
    .bind(reward_type)
    .bind(payout_schedule)
    .bind(max_redemptions)
    .bind(custom_field_config)
    .fetch_one(pool)
    .await
    .expect("插入测试活动失败");
    row.0
}

async fn insert_code(
    pool: &PgPool,
    campaign_id: Uuid,
    organization_id: Uuid,
    merchant_id: Option<Uuid>,
) -> String {
    let code = test_code();
    sqlx::query(
        r#"
        INSERT INTO codes (code, campaign_id, organization_id, merchant_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&code)
    .bind(campaign_id)
    .bind(organization_id)
    .bind(merchant_id)
    .execute(pool)
    .await
    .expect("插入测试兑换码失败");
    code
}

async fn insert_paused_merchant(pool: &PgPool, campaign_id: Uuid, organization_id: Uuid) -> Uuid {
    let row: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO merchants
            (campaign_id, organization_id, name, payment_address, status)
        VALUES ($1, $2, '暂停的商户', 'shop@upi', 'PAUSED')
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .expect("插入测试商户失败");
    row.0
}

/// 插入已有收款地址的领奖人
async fn insert_claimant_with_upi(pool: &PgPool, phone: &str) {
    sqlx::query(
        r#"
        INSERT INTO claimants (phone_number, full_name, payment_address)
        VALUES ($1, '测试用户', 'user@upi')
        ON CONFLICT (phone_number) DO UPDATE SET payment_address = 'user@upi'
        "#,
    )
    .bind(phone)
    .execute(pool)
    .await
    .expect("插入测试领奖人失败");
}

fn code_request(phone: &str, code: &str) -> RedemptionRequest {
    RedemptionRequest {
        claimant_phone: phone.to_string(),
        code: Some(code.to_string()),
        qr_text: None,
        trigger_text: None,
        supplemental_data: SupplementalData::default(),
    }
}

async fn count_transactions(pool: &PgPool, campaign_id: Uuid, status: &str) -> i64 {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM transactions WHERE campaign_id = $1 AND status = $2",
    )
    .bind(campaign_id)
    .bind(status)
    .fetch_one(pool)
    .await
    .unwrap();
    row.0
}

// ==================== 测试用例 ====================

/// 端到端场景：首次兑换按档位 1 发放，换一个码重试返回幂等响应
#[tokio::test]
#[ignore]
async fn test_end_to_end_single_redemption() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "CASHBACK",
        json!({"1": {"min": 20, "max": 20, "avg": 20}}),
        Some(1),
        json!([]),
    )
    .await;
    let code_a = insert_code(&pool, campaign, org, None).await;
    let code_b = insert_code(&pool, campaign, org, None).await;
    let phone = test_phone_number();
    insert_claimant_with_upi(&pool, &phone).await;

    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let service = service_with(&pool, dispatcher.clone());

    // 首次兑换：档位 1 的金额
    let outcome = service.redeem(code_request(&phone, &code_a)).await.unwrap();
    match outcome {
        RedemptionOutcome::Success {
            amount,
            artifact_code,
        } => {
            assert_eq!(amount, 20);
            assert!(artifact_code.unwrap().starts_with("DISC-"));
        }
        other => panic!("期望 Success，实际 {:?}", other),
    }

    // 码已核销
    let (is_used,): (bool,) = sqlx::query_as("SELECT is_used FROM codes WHERE code = $1")
        .bind(&code_a)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(is_used);

    // 同一领奖人换另一个有效码：幂等响应，无新流水、无新打款
    let outcome = service.redeem(code_request(&phone, &code_b)).await.unwrap();
    assert_eq!(outcome, RedemptionOutcome::AlreadyRedeemed);
    assert_eq!(count_transactions(&pool, campaign, "SUCCESS").await, 1);
    assert_eq!(dispatcher.transfer_calls.load(Ordering::SeqCst), 1);

    // 第二个码未被核销
    let (b_used,): (bool,) = sqlx::query_as("SELECT is_used FROM codes WHERE code = $1")
        .bind(&code_b)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!b_used);
}

/// 幂等重放：原样重发已成功的请求返回 ALREADY_REDEEMED
#[tokio::test]
#[ignore]
async fn test_idempotent_replay_of_successful_request() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "CASHBACK",
        json!({"1": {"min": 20, "max": 20, "avg": 20}}),
        Some(1),
        json!([]),
    )
    .await;
    let code = insert_code(&pool, campaign, org, None).await;
    let phone = test_phone_number();
    insert_claimant_with_upi(&pool, &phone).await;

    let service = service_with(&pool, Arc::new(StubDispatcher::succeeding()));

    let first = service.redeem(code_request(&phone, &code)).await.unwrap();
    assert!(first.is_success());

    // 完全相同的请求重放
    let replay = service.redeem(code_request(&phone, &code)).await.unwrap();
    assert_eq!(replay, RedemptionOutcome::AlreadyRedeemed);
    assert_eq!(count_transactions(&pool, campaign, "SUCCESS").await, 1);

    // 其他人使用该已核销的码则被拒绝
    let other_phone = test_phone_number();
    insert_claimant_with_upi(&pool, &other_phone).await;
    let outcome = service
        .redeem(code_request(&other_phone, &code))
        .await
        .unwrap();
    match outcome {
        RedemptionOutcome::Rejected { code: err_code, .. } => {
            assert_eq!(err_code, "CODE_ALREADY_USED");
        }
        other => panic!("期望 Rejected，实际 {:?}", other),
    }
}

/// 渠道失败时不核销码、不产生成功流水
#[tokio::test]
#[ignore]
async fn test_no_mutation_on_dispatch_failure() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "CASHBACK",
        json!({"1": {"min": 20, "max": 20, "avg": 20}}),
        Some(1),
        json!([]),
    )
    .await;
    let code = insert_code(&pool, campaign, org, None).await;
    let phone = test_phone_number();
    insert_claimant_with_upi(&pool, &phone).await;

    let service = service_with(&pool, Arc::new(StubDispatcher::declining()));

    let outcome = service.redeem(code_request(&phone, &code)).await.unwrap();
    match outcome {
        RedemptionOutcome::DispatchFailed { reason } => {
            assert!(reason.contains("insufficient balance"));
        }
        other => panic!("期望 DispatchFailed，实际 {:?}", other),
    }

    // 码未核销
    let (is_used,): (bool,) = sqlx::query_as("SELECT is_used FROM codes WHERE code = $1")
        .bind(&code)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!is_used);

    // 无成功流水；有一条 FAILED 审计流水
    assert_eq!(count_transactions(&pool, campaign, "SUCCESS").await, 0);
    assert_eq!(count_transactions(&pool, campaign, "FAILED").await, 1);

    // 渠道恢复后整个请求可重试成功
    let service = service_with(&pool, Arc::new(StubDispatcher::succeeding()));
    let outcome = service.redeem(code_request(&phone, &code)).await.unwrap();
    assert!(outcome.is_success());
}

/// 商户暂停：返回"本次不发放"的成功形结果，不写流水
#[tokio::test]
#[ignore]
async fn test_paused_merchant_skips_payout() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "CASHBACK",
        json!({"1": {"min": 20, "max": 20, "avg": 20}}),
        Some(1),
        json!([]),
    )
    .await;
    let merchant = insert_paused_merchant(&pool, campaign, org).await;
    let code = insert_code(&pool, campaign, org, Some(merchant)).await;
    let phone = test_phone_number();
    insert_claimant_with_upi(&pool, &phone).await;

    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let service = service_with(&pool, dispatcher.clone());

    let outcome = service.redeem(code_request(&phone, &code)).await.unwrap();
    assert!(matches!(outcome, RedemptionOutcome::PayoutSkipped { .. }));

    // 没有打款调用，没有任何流水
    assert_eq!(dispatcher.transfer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(count_transactions(&pool, campaign, "SUCCESS").await, 0);
    assert_eq!(count_transactions(&pool, campaign, "FAILED").await, 0);
}

/// 礼品活动缺少必填字段被拒绝，不发起发货
#[tokio::test]
#[ignore]
async fn test_gift_missing_required_field_rejected() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "GIFT",
        json!({}),
        Some(1),
        json!([{"fieldName": "size", "required": true}]),
    )
    .await;
    let code = insert_code(&pool, campaign, org, None).await;
    let phone = test_phone_number();

    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let service = service_with(&pool, dispatcher.clone());

    let mut request = code_request(&phone, &code);
    request.supplemental_data.shipping_address = Some("某某街道 123 号".to_string());
    // 不提供 size 字段

    let outcome = service.redeem(request).await.unwrap();
    match outcome {
        RedemptionOutcome::Rejected { code: err_code, .. } => {
            assert_eq!(err_code, "REQUIRED_FIELD_MISSING");
        }
        other => panic!("期望 Rejected，实际 {:?}", other),
    }
    assert_eq!(dispatcher.shipment_calls.load(Ordering::SeqCst), 0);
}

/// 并发兑换同一 (领奖人, 活动)：至多一条成功流水、至多一次打款
#[tokio::test]
#[ignore]
async fn test_concurrent_redemptions_grant_at_most_once() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "CASHBACK",
        json!({"1": {"min": 20, "max": 20, "avg": 20}}),
        Some(1),
        json!([]),
    )
    .await;
    let phone = test_phone_number();
    insert_claimant_with_upi(&pool, &phone).await;

    // 每个并发请求使用不同的有效码，绕开单码核销的互斥
    let mut codes = Vec::new();
    for _ in 0..5 {
        codes.push(insert_code(&pool, campaign, org, None).await);
    }

    let dispatcher = Arc::new(StubDispatcher::succeeding());
    let service = Arc::new(service_with(&pool, dispatcher.clone()));

    let mut handles = Vec::new();
    for code in codes {
        let service = service.clone();
        let phone = phone.clone();
        handles.push(tokio::spawn(async move {
            service.redeem(code_request(&phone, &code)).await
        }));
    }

    let mut success_count = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                if outcome.is_success() {
                    success_count += 1;
                }
            }
            // 锁竞争失败是可重试的系统结果，不构成发奖
            Err(e) => assert!(e.is_retryable(), "非预期错误: {}", e),
        }
    }

    assert_eq!(success_count, 1, "并发请求中应恰好一个成功");
    assert_eq!(count_transactions(&pool, campaign, "SUCCESS").await, 1);
    assert_eq!(dispatcher.transfer_calls.load(Ordering::SeqCst), 1);
}

/// 阶梯推进：不限次活动的第二次兑换取档位 2
#[tokio::test]
#[ignore]
async fn test_tier_advances_across_redemptions() {
    let pool = connect().await;
    let org = insert_organization(&pool).await;
    let campaign = insert_campaign(
        &pool,
        org,
        "CASHBACK",
        json!({
            "1": {"min": 20, "max": 20, "avg": 20},
            "2": {"min": 30, "max": 30, "avg": 30}
        }),
        None, // 不限次数
        json!([]),
    )
    .await;
    let code_a = insert_code(&pool, campaign, org, None).await;
    let code_b = insert_code(&pool, campaign, org, None).await;
    let phone = test_phone_number();
    insert_claimant_with_upi(&pool, &phone).await;

    let service = service_with(&pool, Arc::new(StubDispatcher::succeeding()));

    match service.redeem(code_request(&phone, &code_a)).await.unwrap() {
        RedemptionOutcome::Success { amount, .. } => assert_eq!(amount, 20),
        other => panic!("期望 Success，实际 {:?}", other),
    }
    match service.redeem(code_request(&phone, &code_b)).await.unwrap() {
        RedemptionOutcome::Success { amount, .. } => assert_eq!(amount, 30),
        other => panic!("期望 Success，实际 {:?}", other),
    }

    assert_eq!(count_transactions(&pool, campaign, "SUCCESS").await, 2);
}
