//! UPI 打款客户端
//!
//! 对接外部转账服务的 HTTP 客户端。传输层故障（连接失败、超时）
//! 映射为可重试的依赖错误；服务端返回的业务失败（无效地址、余额不足）
//! 映射为 success=false 的确定性响应。

use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use reward_shared::config::DispatchConfig;

use super::{CashTransferRequest, DispatchResponse, is_invalid_payment_address};
use crate::error::{RedemptionError, Result};

/// UPI 打款客户端
pub struct UpiPayoutClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl UpiPayoutClient {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.request_timeout_seconds,
            ))
            .build()
            .map_err(|e| RedemptionError::Internal(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.payout_base_url.trim_end_matches('/').to_string(),
            client_id: config.payout_client_id.clone(),
            client_secret: config.payout_client_secret.clone(),
        })
    }

    /// 发起一笔 UPI 转账
    ///
    /// transfer_id 每次调用重新生成，转账服务以其做幂等键。
    #[instrument(skip(self, request), fields(amount = request.amount))]
    pub async fn transfer(&self, request: &CashTransferRequest) -> Result<DispatchResponse> {
        let transfer_id = format!("txn_{}", Uuid::new_v4().simple());
        let body = json!({
            "merchant_details": {
                "merchant_name": request.payee_name,
                "merchant_instrument_details": {
                    "vpa": request.payment_address,
                },
            },
            "transfer_mode": "upi",
            "transfer_id": transfer_id,
            "transfer_amount": request.amount,
        });

        let response = self
            .http
            .post(format!("{}/transfers", self.base_url))
            .header("x-api-version", "2024-01-01")
            .header("x-client-id", &self.client_id)
            .header("x-client-secret", &self.client_secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| RedemptionError::DependencyUnavailable {
                channel: "upi".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let provider_response: Value = response.json().await.unwrap_or_else(|e| {
            json!({"message": format!("响应体解析失败: {}", e)})
        });

        if status.is_success() {
            info!(
                transfer_id = %transfer_id,
                amount = request.amount,
                "UPI 打款成功"
            );
            return Ok(DispatchResponse::succeeded(provider_response));
        }

        if is_invalid_payment_address(&provider_response) {
            warn!(
                payee = %request.payee_name,
                "收款地址无效，渠道拒绝打款"
            );
        } else {
            error!(
                http_status = %status,
                response = %provider_response,
                "UPI 打款被渠道拒绝"
            );
        }

        Ok(DispatchResponse::declined(provider_response))
    }
}
