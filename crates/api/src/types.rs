//! # DTO (Data Transfer Object) 层
//!
//! 将内部领域模型转化为面向前端 JSON 输出的轻量结构体。
//! 所有 DTO 必须派生 `utoipa::ToSchema` 以自动进入 Swagger 文档。
//! 金额字段一律以字符串形式出入，避免浮点精度污染。

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use kessai_core::ledger::entity::Account;
use kessai_core::trade::entity::{SETTLEMENT_ASSET, Trade};

// ============================================================
//  注单相关 DTO
// ============================================================

/// 开仓请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTradeRequest {
    /// 交易标的
    #[schema(example = "BTC/USDT")]
    pub pair: String,
    /// 方向 ("up"/"1" 或 "down"/"2")
    #[schema(example = "up")]
    pub direction: String,
    /// 本金（结算币种计价）
    #[schema(example = "100.00")]
    pub stake: String,
    /// 注单时长（秒）
    #[schema(example = 60)]
    pub duration_secs: i64,
    /// 收益率（百分数，缺省 40）
    #[schema(example = "40")]
    pub payout_ratio: Option<String>,
    /// 开仓参考价（仅作记录）
    #[schema(example = "65000.00")]
    pub entry_price: Option<String>,
}

/// 注单明细 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TradeResponse {
    /// 注单 ID
    #[schema(example = "a1b2c3d4-e5f6-7890")]
    pub id: String,
    /// 归属者标识
    #[schema(example = "10086")]
    pub owner: String,
    /// 交易标的
    #[schema(example = "BTC/USDT")]
    pub pair: String,
    /// 方向 (Up/Down)
    #[schema(example = "Up")]
    pub direction: String,
    /// 本金
    #[schema(example = "100.00")]
    pub stake: String,
    /// 收益率（百分数）
    #[schema(example = "40")]
    pub payout_ratio: String,
    /// 注单时长（秒）
    #[schema(example = 60)]
    pub duration_secs: i64,
    /// 开仓参考价
    #[schema(example = "65000.00")]
    pub entry_price: Option<String>,
    /// 状态 (Pending / Win / Loss)
    #[schema(example = "Pending")]
    pub status: String,
    /// 带符号盈亏，未结算为 null
    #[schema(example = "40.00")]
    pub profit: Option<String>,
    /// 创建时间 (ISO 8601)
    #[schema(example = "2026-03-01T00:00:00Z")]
    pub created_at: String,
    /// 到期时间 (ISO 8601)
    #[schema(example = "2026-03-01T00:01:00Z")]
    pub matures_at: String,
}

/// 状态轮询 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TradeStatusResponse {
    /// 注单 ID
    #[schema(example = "a1b2c3d4-e5f6-7890")]
    pub trade_id: String,
    /// 状态 (Pending / Win / Loss)
    #[schema(example = "Pending")]
    pub status: String,
}

/// 盈亏轮询 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TradeProfitResponse {
    /// 注单 ID
    #[schema(example = "a1b2c3d4-e5f6-7890")]
    pub trade_id: String,
    /// 带符号盈亏；未结算时为字面量 "pending"
    #[schema(example = "pending")]
    pub profit: String,
}

/// 强制结论请求体（运营专用）
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForceOutcomeRequest {
    /// 结论 ("win" 或 "loss")
    #[schema(example = "win")]
    pub outcome: String,
}

// ============================================================
//  账户相关 DTO
// ============================================================

/// 账户基础信息响应 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    /// 归属者唯一标识
    #[schema(example = "10086")]
    pub owner: String,
    /// 显示名称
    #[schema(example = "Trader 01")]
    pub name: String,
    /// 角色 (Admin 或 User)
    #[schema(example = "User")]
    pub role: String,
    /// 结算币种余额
    #[schema(example = "1000.00")]
    pub balance: String,
    /// 账户级强制赢标志
    #[schema(example = false)]
    pub force_trade_win: bool,
    /// 注册时间 (ISO 8601)
    #[schema(example = "2026-03-01T00:00:00Z")]
    pub created_at: String,
}

/// 创建新账户请求体（仅运营）
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    /// 归属者登录 ID
    #[schema(example = "trader_01")]
    pub id: String,
    /// 显示名
    #[schema(example = "John Doe")]
    pub name: String,
    /// 初始密码
    #[schema(example = "P@ssw0rd!")]
    pub password: String,
    /// 角色 (Admin 或 User)
    #[schema(example = "User")]
    pub role: String,
}

/// 账户级强制赢标志请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForceWinRequest {
    /// 开启或关闭
    #[schema(example = true)]
    pub enabled: bool,
}

/// 运营入账请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditRequest {
    /// 币种，缺省为结算币种
    #[schema(example = "USDT")]
    pub asset: Option<String>,
    /// 带符号增量（负数为扣减）
    #[schema(example = "1000.00")]
    pub amount: String,
}

// ============================================================
//  通用响应 DTO
// ============================================================

/// 统一 API 响应包装器
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T: Serialize + ToSchema> {
    /// 是否成功
    pub success: bool,
    /// 数据载荷 (成功时)
    pub data: Option<T>,
    /// 错误信息 (失败时)
    pub error: Option<String>,
}

impl<T: Serialize + ToSchema> ApiResponse<T> {
    /// 构建成功响应
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// 构建失败响应 (不含泛型载荷)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// 固定为 false
    pub success: bool,
    /// 错误描述信息
    pub error: String,
}

impl ApiErrorResponse {
    /// 从错误信息构建
    pub fn from_msg(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: msg.into(),
        }
    }
}

// ============================================================
//  鉴权 DTO
// ============================================================

/// 登录请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// 归属者标识（用户名、数字 ID 或钱包地址）
    #[schema(example = "10086")]
    pub username: String,
    /// 密码
    #[schema(example = "password123")]
    pub password: String,
}

/// 修改密码请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    /// 原密码
    #[schema(example = "oldpassword123")]
    pub old_password: String,
    /// 新密码
    #[schema(example = "newSecurePwd!")]
    pub new_password: String,
}

/// 登录成功返回的 JWT Token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// JWT Bearer Token
    #[schema(example = "eyJhbGciOiJIUzI1NiIs...")]
    pub token: String,
    /// Token 过期时间 (秒)
    #[schema(example = 86400)]
    pub expires_in: u64,
}

/// 运营登录成功返回的不透明令牌
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminLoginResponse {
    /// 运营令牌，通过 `X-Admin-Token` 请求头携带
    #[schema(example = "8f14e45fceea167a5a36dedd4bea2543")]
    pub token: String,
    /// 令牌有效期 (秒)
    #[schema(example = 3600)]
    pub expires_in: u64,
}

/// JWT Claims 内容 (内部使用，不暴露到 Swagger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 归属者规范化标识
    pub sub: String,
    /// 角色 ("User" 或 "Admin")
    pub role: String,
    /// Token 过期时间 (Unix 时间戳)
    pub exp: i64,
}

// ============================================================
//  领域模型 → DTO 惯用转换 (impl From<T>)
// ============================================================

impl From<&Trade> for TradeResponse {
    fn from(t: &Trade) -> Self {
        Self {
            id: t.id.to_string(),
            owner: t.owner.to_string(),
            pair: t.pair.clone(),
            direction: format!("{:?}", t.direction),
            stake: t.stake.to_string(),
            payout_ratio: t.payout_ratio.to_string(),
            duration_secs: t.duration_secs,
            entry_price: t.entry_price.map(|p| p.to_string()),
            status: t.status.to_string(),
            profit: t.profit_amount.map(|p| p.to_string()),
            created_at: t.created_at.to_rfc3339(),
            matures_at: t.matures_at().to_rfc3339(),
        }
    }
}

impl From<&Account> for AccountResponse {
    fn from(a: &Account) -> Self {
        Self {
            owner: a.owner.to_string(),
            name: a.name.clone(),
            role: a.role.to_string(),
            balance: a.balance_of(SETTLEMENT_ASSET).to_string(),
            force_trade_win: a.force_trade_win,
            created_at: a.created_at.to_rfc3339(),
        }
    }
}
