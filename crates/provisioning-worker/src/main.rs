//! 发码 Worker 服务入口
//!
//! 加载配置、初始化可观测性与数据库连接，随后进入任务轮询主循环。

use anyhow::Result;
use tokio::signal;
use tracing::info;

use provisioning_worker::worker::ProvisioningWorker;
use reward_shared::{config::AppConfig, database::Database, observability};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 统一加载配置：config/{service_name}.toml + REWARD_ 环境变量
    let config = AppConfig::load("provisioning-worker").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化可观测性（日志 + 指标）
    let obs_config = config
        .observability
        .clone()
        .with_service_name("provisioning-worker");
    let _guard = observability::init(&obs_config).await?;

    info!("Starting provisioning-worker...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 初始化数据库连接
    let db = Database::connect(&config.database).await?;
    info!("Database connection established");

    // 4. 启动 Worker 主循环，Ctrl-C 退出
    let worker = ProvisioningWorker::new(db.pool().clone(), &config.worker);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping provisioning-worker");
        }
    }

    db.close().await;
    Ok(())
}
