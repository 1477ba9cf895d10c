//! # 运营专有路由控制器
//!
//! 提供开户、入账、强制结论与提前结算等运营能力。
//! 除登录外的路由全部受 `admin_auth_middleware` 保护，
//! 令牌通过 `X-Admin-Token` 请求头携带。

use axum::Json;
use axum::extract::{Path, State};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{
    AccountResponse, AdminLoginResponse, ApiResponse, CreateAccountRequest, CreditRequest,
    ForceOutcomeRequest, ForceWinRequest, LoginRequest, TradeResponse,
};
use kessai_core::common::OwnerKey;
use kessai_core::ledger::entity::AccountRole;
use kessai_core::trade::entity::{Outcome, SETTLEMENT_ASSET, TradeId};

/// 运营登录
///
/// 验证 Admin 角色账户的密码，颁发短期有效的不透明运营令牌。
#[utoipa::path(
    post,
    path = "/api/v1/admin/login",
    tag = "运营 (Admin)",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "登录成功", body = ApiResponse<AdminLoginResponse>),
        (status = 401, description = "凭据错误或非运营账户"),
        (status = 503, description = "会话表已满")
    )
)]
pub async fn admin_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AdminLoginResponse>>, ApiError> {
    let owner = state
        .ledger
        .resolve_owner(&req.username)
        .await
        .map_err(|e| ApiError::Internal(format!("DB error: {}", e)))?;

    let account = match owner {
        Some(key) => state
            .ledger
            .get_account(&key)
            .await
            .map_err(|e| ApiError::Internal(format!("DB error: {}", e)))?,
        None => None,
    };

    // 凭据错误与角色不符返回同一错误，不泄露账户是否存在
    let account = account
        .filter(|a| a.role == AccountRole::Admin)
        .ok_or_else(|| ApiError::Unauthorized("Invalid admin credentials".into()))?;

    let valid = bcrypt::verify(&req.password, &account.password_hash).unwrap_or(false);
    if !valid {
        return Err(ApiError::Unauthorized("Invalid admin credentials".into()));
    }

    let token = state
        .admin_sessions
        .issue(&account.owner)
        .ok_or_else(|| ApiError::Internal("Admin session table is full".into()))?;

    tracing::info!("运营账户 {} 登录成功", account.owner);
    Ok(Json(ApiResponse::ok(AdminLoginResponse {
        token,
        expires_in: state.admin_sessions.ttl_secs(),
    })))
}

/// 开户
///
/// 创建新账户并以零余额初始化结算币种。新账户默认标记为强制改密。
#[utoipa::path(
    post,
    path = "/api/v1/admin/users",
    tag = "运营 (Admin)",
    security(("admin_token" = [])),
    request_body = CreateAccountRequest,
    responses(
        (status = 200, description = "开户成功", body = ApiResponse<AccountResponse>),
        (status = 400, description = "参数非法或账户已存在"),
        (status = 401, description = "未认证"),
        (status = 403, description = "无权限执行此操作")
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    tracing::info!("Received create_account request for ID: {}", req.id);

    let owner = OwnerKey::normalize(&req.id)
        .ok_or_else(|| ApiError::BadRequest("Account ID must not be blank".into()))?;

    let role = req.role.parse::<AccountRole>().map_err(ApiError::BadRequest)?;

    let hashed_pwd = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|_| ApiError::Internal("Failed to hash new account password".into()))?;

    let account = state
        .ledger
        .create_account(&owner, &req.name, &hashed_pwd, role)
        .await?;

    // 新账户默认被标记为强制改密码
    state
        .ledger
        .save_credentials(&owner, &hashed_pwd, true)
        .await?;

    Ok(Json(ApiResponse::ok(AccountResponse::from(&account))))
}

/// 设置账户级强制赢标志
///
/// 置位后该账户所有未来到期的注单都结算为赢；不回溯已终结注单。
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{owner_id}/force_win",
    tag = "运营 (Admin)",
    security(("admin_token" = [])),
    params(
        ("owner_id" = String, Path, description = "归属者标识（接受任意历史别名）")
    ),
    request_body = ForceWinRequest,
    responses(
        (status = 200, description = "设置成功", body = ApiResponse<String>),
        (status = 404, description = "账户不存在")
    )
)]
pub async fn set_force_win(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(req): Json<ForceWinRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let owner = resolve_existing_owner(&state, &owner_id).await?;
    state.engine.set_force_win(&owner, req.enabled).await?;
    Ok(Json(ApiResponse::ok("ok".to_string())))
}

/// 运营入账
///
/// 向指定账户的某一资产余额入账一笔带符号增量（负数为扣减），
/// 结果为负时向零取整落地。
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{owner_id}/credit",
    tag = "运营 (Admin)",
    security(("admin_token" = [])),
    params(
        ("owner_id" = String, Path, description = "归属者标识（接受任意历史别名）")
    ),
    request_body = CreditRequest,
    responses(
        (status = 200, description = "入账成功", body = ApiResponse<AccountResponse>),
        (status = 400, description = "金额非法"),
        (status = 404, description = "账户不存在")
    )
)]
pub async fn credit_account(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(req): Json<CreditRequest>,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    let owner = resolve_existing_owner(&state, &owner_id).await?;
    let amount = req
        .amount
        .trim()
        .parse::<rust_decimal::Decimal>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid decimal for amount: {}", req.amount)))?;
    let asset = req.asset.as_deref().unwrap_or(SETTLEMENT_ASSET);

    let account = state
        .ledger
        .apply_delta(&owner, asset, amount, "AdminCredit")
        .await?;

    tracing::info!("运营入账: owner={} asset={} delta={}", owner, asset, amount);
    Ok(Json(ApiResponse::ok(AccountResponse::from(&account))))
}

/// 写入强制结论
///
/// 为 Pending 且未结算的注单预置结论；到期（或提前结算）时生效。
/// 用户侧轮询在到期前不会泄露该结论。
#[utoipa::path(
    post,
    path = "/api/v1/admin/trades/{trade_id}/outcome",
    tag = "运营 (Admin)",
    security(("admin_token" = [])),
    params(
        ("trade_id" = String, Path, description = "注单 ID")
    ),
    request_body = ForceOutcomeRequest,
    responses(
        (status = 200, description = "写入成功", body = ApiResponse<String>),
        (status = 404, description = "注单不存在"),
        (status = 409, description = "注单已结算")
    )
)]
pub async fn force_outcome(
    State(state): State<AppState>,
    Path(trade_id): Path<String>,
    Json(req): Json<ForceOutcomeRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let outcome = req.outcome.parse::<Outcome>().map_err(ApiError::BadRequest)?;
    state
        .engine
        .force_outcome(&TradeId(trade_id), outcome)
        .await?;
    Ok(Json(ApiResponse::ok("ok".to_string())))
}

/// 清除强制结论
///
/// 仅对 Pending 且未结算的注单生效；已终结的注单拒绝 (409)。
#[utoipa::path(
    delete,
    path = "/api/v1/admin/trades/{trade_id}/outcome",
    tag = "运营 (Admin)",
    security(("admin_token" = [])),
    params(
        ("trade_id" = String, Path, description = "注单 ID")
    ),
    responses(
        (status = 200, description = "清除成功", body = ApiResponse<String>),
        (status = 404, description = "注单不存在"),
        (status = 409, description = "注单已结算")
    )
)]
pub async fn clear_outcome(
    State(state): State<AppState>,
    Path(trade_id): Path<String>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    state
        .engine
        .clear_forced_outcome(&TradeId(trade_id))
        .await?;
    Ok(Json(ApiResponse::ok("ok".to_string())))
}

/// 特权结算
///
/// 运营方可在注单到期前触发结算（例如配合已写入的强制结论提前放行）。
/// 已结算的注单幂等返回当前终态。
#[utoipa::path(
    post,
    path = "/api/v1/admin/trades/{trade_id}/settle",
    tag = "运营 (Admin)",
    security(("admin_token" = [])),
    params(
        ("trade_id" = String, Path, description = "注单 ID")
    ),
    responses(
        (status = 200, description = "结算完成或已是终态", body = ApiResponse<TradeResponse>),
        (status = 404, description = "注单不存在")
    )
)]
pub async fn admin_settle(
    State(state): State<AppState>,
    Path(trade_id): Path<String>,
) -> Result<Json<ApiResponse<TradeResponse>>, ApiError> {
    let trade = state.engine.settle(&TradeId(trade_id), true).await?;
    Ok(Json(ApiResponse::ok(TradeResponse::from(&trade))))
}

/// 将任意别名解析为已存在账户的规范键
async fn resolve_existing_owner(state: &AppState, raw: &str) -> Result<OwnerKey, ApiError> {
    state
        .ledger
        .resolve_owner(raw)
        .await
        .map_err(|e| ApiError::Internal(format!("DB error: {}", e)))?
        .ok_or_else(|| ApiError::NotFound(format!("账户不存在: {}", raw)))
}
