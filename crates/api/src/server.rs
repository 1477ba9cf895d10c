//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`, 而是由 `crates/app` 的 DI 容器持有并调用。

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use kessai_core::config::AppConfig;
use kessai_core::ledger::port::Ledger;
use kessai_settle::SettlementEngine;

use crate::middleware::auth::ADMIN_TOKEN_HEADER;
use crate::routes::{admin, auth, trade};
use crate::session::AdminTokenService;

// ============================================================
//  共享应用状态
// ============================================================

/// 全局应用状态，通过 axum 的 `State` 提取器注入到每个 Handler 中。
///
/// # Invariants
/// - `engine` 和 `ledger` 在服务启动前由 DI 容器注入，生命周期与进程等同。
#[derive(Clone)]
pub struct AppState {
    /// 结算引擎 (Facade)
    pub engine: Arc<SettlementEngine>,
    /// 账本端口 (用于鉴权验证和账户管理)
    pub ledger: Arc<dyn Ledger>,
    /// 运营令牌会话
    pub admin_sessions: Arc<AdminTokenService>,
    /// 应用配置 (JWT 密钥等)
    pub app_config: Arc<AppConfig>,
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

/// 全局 OpenAPI 文档结构
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kessai 结算后端 API",
        version = "0.1.0",
        description = "短周期二元注单的结算后端 RESTful API 网关。提供开仓、状态与盈亏轮询、显式结算以及运营侧的结论控制能力。",
        contact(name = "Kessai Team"),
        license(name = "MIT")
    ),
    tags(
        (name = "鉴权 (Auth)", description = "JWT 获取、密码修改登录认证相关API"),
        (name = "注单 (Trade)", description = "注单的开仓、列表、状态与盈亏轮询、显式结算"),
        (name = "运营 (Admin)", description = "开户、入账、强制结论与特权结算")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// 为 OpenAPI 文档注入全局鉴权方案。
///
/// 注册后，Swagger UI 页面顶部将显示 🔒 Authorize 按钮，
/// 用户可以填入 JWT Token 或运营令牌后对标记了 `security` 的接口进行鉴权测试。
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        // 若 components 不存在则创建
        let components = openapi.components.get_or_insert_with(Default::default);

        // 注册名为 "bearer_jwt" 的 HTTP Bearer 鉴权方案
        components.add_security_scheme(
            "bearer_jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some(
                        "在此处填入登录接口返回的 JWT Token（无需 'Bearer ' 前缀）",
                    ))
                    .build(),
            ),
        );

        // 运营令牌走独立的请求头
        components.add_security_scheme(
            "admin_token",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(ADMIN_TOKEN_HEADER))),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// 构建完整的 axum 应用路由树并启动 HTTP 监听。
///
/// # Arguments
/// * `state` - 由外部 DI 容器注入的共享状态
/// * `bind_addr` - 监听的地址与端口，如 `"0.0.0.0:8080"`
pub async fn start_server(
    state: AppState,
    bind_addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    serve_on(state, listener).await
}

/// # Summary
/// 在一个已绑定的监听器上启动服务。
/// 测试用例借此绑定端口 0 以避免端口冲突。
pub async fn serve_on(
    state: AppState,
    listener: tokio::net::TcpListener,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 1. 无需鉴权的公开路由
    let public_router = OpenApiRouter::new()
        .routes(routes!(auth::login))
        .routes(routes!(admin::admin_login));

    // 2. 只需要合法 JWT 鉴权的路由 (普通用户)
    let user_protected_router = OpenApiRouter::new()
        .routes(routes!(auth::change_password))
        .routes(routes!(trade::create_trade, trade::list_trades))
        .routes(routes!(trade::get_trade_status))
        .routes(routes!(trade::get_trade_profit))
        .routes(routes!(trade::settle_trade))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    // 3. 需要运营令牌的路由
    let admin_protected_router = OpenApiRouter::new()
        .routes(routes!(admin::create_account))
        .routes(routes!(admin::set_force_win))
        .routes(routes!(admin::credit_account))
        .routes(routes!(admin::force_outcome, admin::clear_outcome))
        .routes(routes!(admin::admin_settle))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::admin_auth_middleware,
        ));

    // 4. 合并所有路由与自动收集的 OpenAPI Doc
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(public_router)
        .merge(user_protected_router)
        .merge(admin_protected_router)
        .with_state(state)
        .split_for_parts();

    // 5. 配置 CORS (开发阶段允许所有来源)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 6. 合并 Swagger UI 路由并应用中间件
    let app: Router = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(cors);

    let local_addr = listener.local_addr()?;
    tracing::info!("🚀 Kessai API Server listening on {}", local_addr);
    tracing::info!("📖 Swagger UI: http://{}/swagger-ui/", local_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
