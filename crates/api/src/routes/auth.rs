//! # 身份验证路由控制器
//!
//! 实现登录、密码修改等鉴权相关接口。

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};

use crate::error::ApiError;
use crate::middleware::auth::CurrentAccount;
use crate::server::AppState;
use crate::types::{ApiResponse, ChangePasswordRequest, Claims, LoginRequest, LoginResponse};

const JWT_EXPIRES_IN: u64 = 86400 * 7; // 7 days

/// 用户登录
///
/// 接受任意历史别名形式的归属者标识（用户名、数字 ID、钱包地址），
/// 验证密码后颁发 JWT Token。
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "鉴权 (Auth)",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "登录成功", body = ApiResponse<LoginResponse>),
        (status = 401, description = "用户名或密码错误")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    // 1. 别名解析 -> 规范键 -> 账户
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

    let account = match account {
        Some(a) => a,
        None => {
            return Err(ApiError::Unauthorized(
                "Invalid username or password".into(),
            ));
        }
    };

    // 2. 验证密码
    let valid = bcrypt::verify(&req.password, &account.password_hash).unwrap_or(false);

    if !valid {
        return Err(ApiError::Unauthorized(
            "Invalid username or password".into(),
        ));
    }

    // 3. 生成 JWT
    let exp = Utc::now().timestamp() + i64::try_from(JWT_EXPIRES_IN).unwrap_or(0);
    let claims = Claims {
        sub: account.owner.to_string(),
        role: account.role.to_string(),
        exp,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.app_config.server.jwt_secret.as_ref()),
    )
    .map_err(|_| ApiError::Internal("Failed to generate token".into()))?;

    Ok(Json(ApiResponse::ok(LoginResponse {
        token,
        expires_in: JWT_EXPIRES_IN,
    })))
}

/// 修改密码
///
/// 验证旧密码并设立新密码。如果账户标记为强制修改密码，此操作会解除该状态。
#[utoipa::path(
    post,
    path = "/api/v1/auth/change_password",
    tag = "鉴权 (Auth)",
    security(("bearer_jwt" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "密码修改成功", body = ApiResponse<String>),
        (status = 401, description = "原密码错误或未认证")
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    // 1. 验证旧密码
    tracing::info!(
        "Attempting to change password for account: {}, force_change: {}",
        account.owner,
        account.force_password_change
    );
    let valid = bcrypt::verify(&req.old_password, &account.password_hash).unwrap_or(false);

    if !valid {
        tracing::warn!("Failed old password validation for account {}", account.owner);
        return Err(ApiError::Unauthorized("Invalid old password".into()));
    }

    if req.new_password.len() < 8 {
        return Err(ApiError::BadRequest(
            "New password must be at least 8 characters".into(),
        ));
    }

    // 2. 生成新密码的 Hash 并落库，同时解除强制改密状态
    let new_hashed = bcrypt::hash(&req.new_password, bcrypt::DEFAULT_COST)
        .map_err(|_| ApiError::Internal("Failed to hash new password".into()))?;

    state
        .ledger
        .save_credentials(&account.owner, &new_hashed, false)
        .await?;

    Ok(Json(ApiResponse::ok("Password changed successfully".into())))
}
