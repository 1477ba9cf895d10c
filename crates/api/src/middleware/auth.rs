//! # 鉴权中间件
//!
//! 用户侧基于 JWT 的身份验证；运营侧基于 `X-Admin-Token` 请求头的
//! 服务端会话令牌验证。两条链路互不兼容，分别挂在不同路由组上。

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::Claims;
use kessai_core::common::OwnerKey;
use kessai_core::ledger::entity::{Account, AccountRole};

/// 运营令牌的请求头名称
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// 提取并验证 Authorization: Bearer <token>
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req.headers().get(axum::http::header::AUTHORIZATION);

    let token = match auth_header {
        Some(header_val) => {
            let s = header_val
                .to_str()
                .map_err(|_| ApiError::Unauthorized("Invalid auth header".into()))?;
            match s.strip_prefix("Bearer ") {
                Some(t) => t.to_string(),
                None => {
                    tracing::warn!("Invalid Bearer format: {}", s);
                    return Err(ApiError::Unauthorized("Invalid Bearer format".into()));
                }
            }
        }
        None => {
            tracing::warn!("Missing Authorization header");
            return Err(ApiError::Unauthorized("Missing Authorization header".into()));
        }
    };

    let claims = match verify_jwt(&token, &state.app_config.server.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("JWT verification failed: {:?}", e);
            return Err(e);
        }
    };

    // 检查账户是否存在，以及是否因为初次登录被锁在"强制改密码"状态。
    // 如果强制改密码，且当前访问的不是 /api/v1/auth/change_password 接口，则拒绝
    let owner = OwnerKey::from_canonical(&claims.sub);
    let account = state
        .ledger
        .get_account(&owner)
        .await
        .map_err(|e| ApiError::Internal(format!("DB Error: {}", e)))?
        .ok_or_else(|| ApiError::Unauthorized("Account not found".into()))?;

    if account.force_password_change && req.uri().path() != "/api/v1/auth/change_password" {
        return Err(ApiError::Forbidden(
            "You must change your password before using the API".into(),
        ));
    }

    // 将账户信息注入 request extensions
    // 以便 downstream handlers 用 `CurrentAccount` 提取
    req.extensions_mut().insert(account);
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// # Summary
/// 运营路由组专用中间件：校验 `X-Admin-Token` 并确认归属账户仍是 Admin 角色。
///
/// # Logic
/// 1. 令牌在会话表中命中且未过期。
/// 2. 令牌归属的账户仍然存在且角色为 Admin（降权立即生效，无需等令牌过期）。
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing admin token".into()))?;

    let owner = state
        .admin_sessions
        .verify(token)
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired admin token".into()))?;

    let account = state
        .ledger
        .get_account(&owner)
        .await
        .map_err(|e| ApiError::Internal(format!("DB Error: {}", e)))?
        .ok_or_else(|| ApiError::Unauthorized("Account not found".into()))?;

    if account.role != AccountRole::Admin {
        return Err(ApiError::Forbidden("Admin privileges required".into()));
    }

    req.extensions_mut().insert(account);
    Ok(next.run(req).await)
}

/// 验证 JWT 返回强类型 Claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.set_required_spec_claims(&["exp", "sub"]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )
    .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    Ok(token_data.claims)
}

// 在提取器中获取当前账户的快捷方式
pub struct CurrentAccount(pub Account);

impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account = parts
            .extensions
            .get::<Account>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Missing Account Context".into()))?;
        Ok(CurrentAccount(account))
    }
}
