//! # 注单路由控制器
//!
//! 用户侧的开仓、列表与轮询接口。状态与盈亏轮询是懒结算的主要入口：
//! 任何一次查询触达到期注单都会先推进其状态机再返回结果。

use axum::Json;
use axum::extract::{Path, Query, State};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::middleware::auth::CurrentAccount;
use crate::server::AppState;
use crate::types::{
    ApiResponse, CreateTradeRequest, TradeProfitResponse, TradeResponse, TradeStatusResponse,
};
use kessai_core::ledger::entity::{Account, AccountRole};
use kessai_core::trade::entity::{Trade, TradeDirection, TradeId};
use kessai_settle::OpenTradeRequest;

/// 列表查询缺省返回的最大条数
const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTradesQuery {
    /// 最多返回条数（缺省 50）
    pub limit: Option<u32>,
}

/// 开仓
///
/// 为当前用户创建一笔新注单。开仓不扣除本金，但本金不得超过结算币种可用余额。
#[utoipa::path(
    post,
    path = "/api/v1/user/trades",
    tag = "注单 (Trade)",
    security(("bearer_jwt" = [])),
    request_body = CreateTradeRequest,
    responses(
        (status = 200, description = "开仓成功", body = ApiResponse<TradeResponse>),
        (status = 400, description = "参数非法或资金不足"),
        (status = 401, description = "未认证")
    )
)]
pub async fn create_trade(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(req): Json<CreateTradeRequest>,
) -> Result<Json<ApiResponse<TradeResponse>>, ApiError> {
    let direction = req
        .direction
        .parse::<TradeDirection>()
        .map_err(ApiError::BadRequest)?;

    let stake = parse_decimal(&req.stake, "stake")?;
    let payout_ratio = match &req.payout_ratio {
        Some(raw) => Some(parse_decimal(raw, "payout_ratio")?),
        None => None,
    };
    let entry_price = match &req.entry_price {
        Some(raw) => Some(parse_decimal(raw, "entry_price")?),
        None => None,
    };

    let trade = state
        .engine
        .open_trade(
            &account.owner,
            OpenTradeRequest {
                pair: req.pair,
                direction,
                stake,
                duration_secs: req.duration_secs,
                payout_ratio,
                entry_price,
            },
        )
        .await?;

    Ok(Json(ApiResponse::ok(TradeResponse::from(&trade))))
}

/// 注单列表
///
/// 按创建时间倒序返回当前用户的注单。列表中已到期的注单会被机会性结算。
#[utoipa::path(
    get,
    path = "/api/v1/user/trades",
    tag = "注单 (Trade)",
    security(("bearer_jwt" = [])),
    params(ListTradesQuery),
    responses(
        (status = 200, description = "查询成功", body = ApiResponse<Vec<TradeResponse>>),
        (status = 401, description = "未认证")
    )
)]
pub async fn list_trades(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Query(query): Query<ListTradesQuery>,
) -> Result<Json<ApiResponse<Vec<TradeResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let trades = state.engine.list_trades(&account.owner, limit).await?;
    let payload = trades.iter().map(TradeResponse::from).collect();
    Ok(Json(ApiResponse::ok(payload)))
}

/// 状态轮询
///
/// 未到期的注单一律报告 Pending，即使运营方已写入强制结论；
/// 已到期且未结算的注单会先被结算再返回终态。
#[utoipa::path(
    get,
    path = "/api/v1/user/trades/{trade_id}/status",
    tag = "注单 (Trade)",
    security(("bearer_jwt" = [])),
    params(
        ("trade_id" = String, Path, description = "注单 ID")
    ),
    responses(
        (status = 200, description = "查询成功", body = ApiResponse<TradeStatusResponse>),
        (status = 403, description = "注单归属他人"),
        (status = 404, description = "注单不存在")
    )
)]
pub async fn get_trade_status(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(trade_id): Path<String>,
) -> Result<Json<ApiResponse<TradeStatusResponse>>, ApiError> {
    let trade = fetch_owned_trade(&state, &account, &trade_id).await?;
    Ok(Json(ApiResponse::ok(TradeStatusResponse {
        trade_id: trade.id.to_string(),
        status: trade.status.to_string(),
    })))
}

/// 盈亏轮询
///
/// 已结算的注单返回带符号盈亏；未结算时返回字面量 "pending"。
#[utoipa::path(
    get,
    path = "/api/v1/user/trades/{trade_id}/profit",
    tag = "注单 (Trade)",
    security(("bearer_jwt" = [])),
    params(
        ("trade_id" = String, Path, description = "注单 ID")
    ),
    responses(
        (status = 200, description = "查询成功", body = ApiResponse<TradeProfitResponse>),
        (status = 403, description = "注单归属他人"),
        (status = 404, description = "注单不存在")
    )
)]
pub async fn get_trade_profit(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(trade_id): Path<String>,
) -> Result<Json<ApiResponse<TradeProfitResponse>>, ApiError> {
    let trade = fetch_owned_trade(&state, &account, &trade_id).await?;
    let profit = match trade.profit_amount {
        Some(p) => p.to_string(),
        None => "pending".to_string(),
    };
    Ok(Json(ApiResponse::ok(TradeProfitResponse {
        trade_id: trade.id.to_string(),
        profit,
    })))
}

/// 显式结算
///
/// 同步结算一笔已到期的注单。未到期且无强制结论时拒绝 (409)；
/// 已结算的注单幂等返回当前终态。
#[utoipa::path(
    post,
    path = "/api/v1/user/trades/{trade_id}/settle",
    tag = "注单 (Trade)",
    security(("bearer_jwt" = [])),
    params(
        ("trade_id" = String, Path, description = "注单 ID")
    ),
    responses(
        (status = 200, description = "结算完成或已是终态", body = ApiResponse<TradeResponse>),
        (status = 403, description = "注单归属他人"),
        (status = 404, description = "注单不存在"),
        (status = 409, description = "注单尚未到期")
    )
)]
pub async fn settle_trade(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(trade_id): Path<String>,
) -> Result<Json<ApiResponse<TradeResponse>>, ApiError> {
    // 归属校验先于结算触发
    let _ = fetch_owned_trade(&state, &account, &trade_id).await?;

    let trade = state
        .engine
        .settle(&TradeId(trade_id), false)
        .await?;
    Ok(Json(ApiResponse::ok(TradeResponse::from(&trade))))
}

/// 读取注单并校验归属（Admin 角色可越过归属限制）
async fn fetch_owned_trade(
    state: &AppState,
    account: &Account,
    trade_id: &str,
) -> Result<Trade, ApiError> {
    let trade = state.engine.poll(&TradeId(trade_id.to_string())).await?;
    if trade.owner != account.owner && account.role != AccountRole::Admin {
        return Err(ApiError::Forbidden("Trade belongs to another account".into()));
    }
    Ok(trade)
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ApiError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid decimal for {}: {}", field, raw)))
}
