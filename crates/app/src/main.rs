use std::sync::Arc;

use kessai_api::server::{AppState, start_server};
use kessai_api::session::AdminTokenService;
use kessai_core::common::RealTimeProvider;
use kessai_core::config::AppConfig;
use kessai_settle::SettlementEngine;
use kessai_store::sqlite::SqliteBackend;
use tracing::info;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 Arc<dyn Trait> 注入到 SettlementEngine 与 API 层。
///
/// # Logic
/// 1. 初始化全局日志与配置。
/// 2. 实例化基础设施层（SQLite 存储）。
/// 3. 构造应用服务层（SettlementEngine）。
/// 4. 启动 HTTP 服务，直至进程退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 1. 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    info!("Kessai settlement backend starting...");

    // 2. 加载配置：config 文件可缺省，环境变量 KESSAI__* 可覆盖
    let config = load_config();

    // 3. 实例化基础设施层（开户表、注单表、账本流水共用一个事务域，
    //    首次启动自动生成 admin 账户并打印一次性密码）
    let backend = Arc::new(SqliteBackend::new(&config.database.data_dir).await?);

    // 4. 构造应用服务层
    let engine = Arc::new(SettlementEngine::new(
        backend.clone(),
        backend.clone(),
        Arc::new(RealTimeProvider),
    ));

    // 5. 组装 API 状态并启动 HTTP 服务
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        engine,
        ledger: backend,
        admin_sessions: Arc::new(AdminTokenService::new(config.server.admin_session_ttl_secs)),
        app_config: Arc::new(config),
    };

    start_server(state, &bind_addr).await
}

/// 分层加载配置：默认值 <- config.toml (可选) <- KESSAI__* 环境变量
fn load_config() -> AppConfig {
    let loaded = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::with_prefix("KESSAI").separator("__"))
        .build()
        .and_then(|c| c.try_deserialize::<AppConfig>());

    match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("配置加载失败，回退默认值: {}", e);
            AppConfig::default()
        }
    }
}
