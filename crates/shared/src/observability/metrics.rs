//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标（预定义的业务指标）
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("redemptions_total", "Total number of redemption attempts");
    metrics::describe_histogram!(
        "redemption_duration_seconds",
        "Redemption attempt duration in seconds"
    );

    metrics::describe_counter!(
        "dispatch_calls_total",
        "Total number of external dispatch calls"
    );
    metrics::describe_histogram!(
        "dispatch_duration_seconds",
        "External dispatch call duration in seconds"
    );

    metrics::describe_counter!(
        "provisioning_jobs_total",
        "Total number of provisioning jobs processed"
    );
    metrics::describe_histogram!(
        "provisioning_job_duration_seconds",
        "Provisioning job duration in seconds"
    );

    metrics::describe_gauge!("worker_last_run_timestamp", "Worker last run unix timestamp");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Metrics server error");
        }
    });

    Ok(server_handle)
}

// ---------------------------------------------------------------------------
// 业务指标记录辅助函数
// ---------------------------------------------------------------------------

/// 记录一次兑换尝试的结果
pub fn record_redemption(outcome: &str, duration_secs: f64) {
    metrics::counter!("redemptions_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("redemption_duration_seconds").record(duration_secs);
}

/// 记录一次外部打款/发货调用
pub fn record_dispatch(channel: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "dispatch_calls_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("dispatch_duration_seconds").record(duration_secs);
}

/// 记录一次发码任务的处理结果
pub fn record_provisioning_job(status: &str, duration_secs: f64) {
    metrics::counter!("provisioning_jobs_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("provisioning_job_duration_seconds").record(duration_secs);
}

/// 记录 Worker 健康心跳
pub fn set_worker_last_run(worker: &str) {
    let now = chrono::Utc::now().timestamp() as f64;
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string()).set(now);
}
