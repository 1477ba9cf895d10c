//! # API 统一错误处理
//!
//! 将下层各 crate 的错误类型统一映射到 HTTP 状态码与 JSON 响应体。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::types::ApiErrorResponse;
use kessai_core::ledger::port::LedgerError;
use kessai_core::trade::port::TradeError;

/// API 层统一错误枚举
#[derive(Error, Debug)]
pub enum ApiError {
    /// 认证失败 (401)
    #[error("认证失败: {0}")]
    Unauthorized(String),

    /// 权限不足 (403)
    #[error("权限不足: {0}")]
    Forbidden(String),

    /// 资源未找到 (404)
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 请求参数错误 (400)
    #[error("请求参数错误: {0}")]
    BadRequest(String),

    /// 当前状态不允许该操作 (409)
    #[error("操作与当前状态冲突: {0}")]
    Conflict(String),

    /// 下层业务错误 (500)
    #[error("内部服务错误: {0}")]
    Internal(String),
}

/// 将 `ApiError` 转换为 axum 的 HTTP 响应
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(msg) => {
                // 内部错误只记录日志，不向客户端透传细节
                tracing::error!("内部服务错误: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "服务器内部错误".to_string(),
                )
            }
        };

        let body = Json(ApiErrorResponse::from_msg(message));
        (status, body).into_response()
    }
}

/// 从 `TradeError` 转换
impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        match &err {
            TradeError::TradeNotFound(msg) => ApiError::NotFound(msg.clone()),
            TradeError::AccountNotFound(msg) => ApiError::NotFound(msg.clone()),
            TradeError::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            TradeError::InsufficientFunds { .. } => ApiError::BadRequest(err.to_string()),
            // 未到期与已终结均属于状态冲突，而非请求格式问题
            TradeError::NotMatured { .. } => ApiError::Conflict(err.to_string()),
            TradeError::InvalidTradeState(msg) => ApiError::Conflict(msg.clone()),
            TradeError::InternalError(_) => ApiError::Internal(err.to_string()),
        }
    }
}

/// 从 `LedgerError` 转换
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::AccountNotFound(msg) => ApiError::NotFound(msg.clone()),
            LedgerError::AccountExists(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
