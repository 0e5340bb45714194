//! 外部发放渠道契约
//!
//! 把两类外部能力收敛到一个契约后面：向收款地址打款、为收货地址创建
//! 物流发货单。从协调器视角看，两者都是"至少尝试一次、成功即终态"的
//! 操作：success=false 表示没有资金/货物实际流动，调用方可以安全地
//! 重试整个兑换；success=true 是终态，同一笔兑换绝不允许再次发起。

mod shipment;
mod upi;

pub use shipment::ShipmentClient;
pub use upi::UpiPayoutClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use reward_shared::config::DispatchConfig;
use reward_shared::observability::metrics;
use reward_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{RedemptionError, Result};

/// 现金打款请求
#[derive(Debug, Clone, Serialize)]
pub struct CashTransferRequest {
    /// UPI 风格的收款地址
    pub payment_address: String,
    pub amount: i64,
    pub payee_name: String,
}

/// 发货请求
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentRequest {
    pub claimant_name: String,
    pub claimant_phone: String,
    pub shipping_address: String,
    pub custom_fields: HashMap<String, String>,
    pub campaign_name: String,
}

/// 渠道响应
///
/// `provider_response` 保留外部渠道的原始响应体，原样写入流水账
/// 供审计与对账使用。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub provider_response: Value,
}

impl DispatchResponse {
    pub fn succeeded(provider_response: Value) -> Self {
        Self {
            success: true,
            provider_response,
        }
    }

    pub fn declined(provider_response: Value) -> Self {
        Self {
            success: false,
            provider_response,
        }
    }

    /// 从渠道响应中提取失败原因（尽力而为）
    pub fn declined_reason(&self) -> String {
        self.provider_response
            .get("reason")
            .or_else(|| self.provider_response.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("渠道未提供失败原因")
            .to_string()
    }
}

/// 渠道响应是否指示收款地址无效
///
/// 打款服务对无效 UPI 的报错文案不稳定，按关键词嗅探。
/// 无效地址属于不可重试的失败——重试同一个地址不会成功。
pub fn is_invalid_payment_address(provider_response: &Value) -> bool {
    let reason = provider_response
        .get("reason")
        .or_else(|| provider_response.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_lowercase();
    reason.contains("invalid upi") || reason.contains("vpa not valid")
}

/// 外部发放渠道契约
///
/// 传输层故障（连接失败、超时）以错误返回；渠道明确拒绝
/// （HTTP 响应携带失败体）以 success=false 的响应返回。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutDispatcher: Send + Sync {
    /// 向收款地址打款
    async fn transfer_cash(&self, request: &CashTransferRequest) -> Result<DispatchResponse>;

    /// 创建物流发货单
    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<DispatchResponse>;
}

/// HTTP 渠道实现
///
/// 组合打款客户端与发货客户端，记录每次调用的指标。
pub struct HttpPayoutDispatcher {
    upi: UpiPayoutClient,
    shipment: ShipmentClient,
}

impl HttpPayoutDispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        Ok(Self {
            upi: UpiPayoutClient::new(config)?,
            shipment: ShipmentClient::new(config)?,
        })
    }
}

#[async_trait]
impl PayoutDispatcher for HttpPayoutDispatcher {
    async fn transfer_cash(&self, request: &CashTransferRequest) -> Result<DispatchResponse> {
        let start = Instant::now();
        let result = self.upi.transfer(request).await;
        let status = match &result {
            Ok(resp) if resp.success => "success",
            Ok(_) => "declined",
            Err(_) => "error",
        };
        metrics::record_dispatch("upi", status, start.elapsed().as_secs_f64());
        result
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<DispatchResponse> {
        let start = Instant::now();
        let result = self.shipment.create(request).await;
        let status = match &result {
            Ok(resp) if resp.success => "success",
            Ok(_) => "declined",
            Err(_) => "error",
        };
        metrics::record_dispatch("shipment", status, start.elapsed().as_secs_f64());
        result
    }
}

/// 带重试的渠道包装器
///
/// 只重试传输层故障（DependencyUnavailable 等可重试错误）。
/// 渠道明确返回的 success=false 是确定性结果，绝不重试——
/// 是否重新发起整个兑换由调用方决定。
pub struct RetryingDispatcher<D: PayoutDispatcher> {
    inner: D,
    policy: RetryPolicy,
}

impl<D: PayoutDispatcher> RetryingDispatcher<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn with_defaults(inner: D) -> Self {
        Self::new(inner, RetryPolicy::default())
    }
}

#[async_trait]
impl<D: PayoutDispatcher> PayoutDispatcher for RetryingDispatcher<D> {
    async fn transfer_cash(&self, request: &CashTransferRequest) -> Result<DispatchResponse> {
        retry_with_policy(
            &self.policy,
            "dispatch.transfer_cash",
            |e: &RedemptionError| e.is_retryable(),
            || self.inner.transfer_cash(request),
        )
        .await
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<DispatchResponse> {
        retry_with_policy(
            &self.policy,
            "dispatch.create_shipment",
            |e: &RedemptionError| e.is_retryable(),
            || self.inner.create_shipment(request),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RedemptionError;
    use serde_json::json;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn transfer_request() -> CashTransferRequest {
        CashTransferRequest {
            payment_address: "shop@upi".to_string(),
            amount: 20,
            payee_name: "临街小店".to_string(),
        }
    }

    #[test]
    fn test_declined_reason_extraction() {
        let resp = DispatchResponse::declined(json!({"reason": "insufficient balance"}));
        assert_eq!(resp.declined_reason(), "insufficient balance");

        let resp = DispatchResponse::declined(json!({"message": "bad request"}));
        assert_eq!(resp.declined_reason(), "bad request");

        let resp = DispatchResponse::declined(json!({}));
        assert!(resp.declined_reason().contains("未提供"));
    }

    #[test]
    fn test_invalid_payment_address_sniffing() {
        assert!(is_invalid_payment_address(
            &json!({"reason": "Invalid UPI id supplied"})
        ));
        assert!(is_invalid_payment_address(
            &json!({"message": "VPA not valid"})
        ));
        assert!(!is_invalid_payment_address(
            &json!({"reason": "insufficient balance"})
        ));
        assert!(!is_invalid_payment_address(&json!({})));
    }

    #[tokio::test]
    async fn test_retrying_dispatcher_retries_transport_errors() {
        let mut mock = MockPayoutDispatcher::new();
        let mut call_count = 0;
        mock.expect_transfer_cash().times(3).returning(move |_| {
            call_count += 1;
            if call_count < 3 {
                Err(RedemptionError::DependencyUnavailable {
                    channel: "upi".to_string(),
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(DispatchResponse::succeeded(json!({"transfer_id": "txn_1"})))
            }
        });

        let dispatcher = RetryingDispatcher::new(mock, fast_policy());
        let resp = dispatcher.transfer_cash(&transfer_request()).await.unwrap();
        assert!(resp.success);
    }

    #[tokio::test]
    async fn test_retrying_dispatcher_never_retries_declined() {
        let mut mock = MockPayoutDispatcher::new();
        // 渠道明确拒绝只调用一次
        mock.expect_transfer_cash()
            .times(1)
            .returning(|_| Ok(DispatchResponse::declined(json!({"reason": "invalid upi"}))));

        let dispatcher = RetryingDispatcher::new(mock, fast_policy());
        let resp = dispatcher.transfer_cash(&transfer_request()).await.unwrap();
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn test_retrying_dispatcher_gives_up_after_budget() {
        let mut mock = MockPayoutDispatcher::new();
        // 首次 + 2 次重试 = 3 次
        mock.expect_transfer_cash().times(3).returning(|_| {
            Err(RedemptionError::DependencyUnavailable {
                channel: "upi".to_string(),
                reason: "timeout".to_string(),
            })
        });

        let dispatcher = RetryingDispatcher::new(mock, fast_policy());
        let result = dispatcher.transfer_cash(&transfer_request()).await;
        assert!(matches!(
            result,
            Err(RedemptionError::DependencyUnavailable { .. })
        ));
    }
}
