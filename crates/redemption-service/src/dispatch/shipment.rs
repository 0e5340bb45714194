//! 物流发货客户端
//!
//! 对接外部物流服务的 HTTP 客户端，为礼品类奖励创建发货单。

use serde_json::{Value, json};
use tracing::{error, info, instrument};

use reward_shared::config::DispatchConfig;

use super::{DispatchResponse, ShipmentRequest};
use crate::error::{RedemptionError, Result};

/// 物流发货客户端
pub struct ShipmentClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ShipmentClient {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.request_timeout_seconds,
            ))
            .build()
            .map_err(|e| RedemptionError::Internal(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.shipment_base_url.trim_end_matches('/').to_string(),
            token: config.shipment_token.clone(),
        })
    }

    /// 创建发货单
    #[instrument(skip(self, request), fields(phone = %request.claimant_phone))]
    pub async fn create(&self, request: &ShipmentRequest) -> Result<DispatchResponse> {
        let body = json!({
            "recipient": {
                "name": request.claimant_name,
                "phone": request.claimant_phone,
                "address": request.shipping_address,
            },
            "campaign": request.campaign_name,
            "custom_fields": request.custom_fields,
        });

        let response = self
            .http
            .post(format!("{}/shipments", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RedemptionError::DependencyUnavailable {
                channel: "shipment".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let provider_response: Value = response.json().await.unwrap_or_else(|e| {
            json!({"message": format!("响应体解析失败: {}", e)})
        });

        if status.is_success() {
            info!(campaign = %request.campaign_name, "发货单创建成功");
            return Ok(DispatchResponse::succeeded(provider_response));
        }

        error!(
            http_status = %status,
            response = %provider_response,
            "发货单创建被渠道拒绝"
        );
        Ok(DispatchResponse::declined(provider_response))
    }
}
