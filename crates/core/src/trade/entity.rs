use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::common::OwnerKey;

/// 结算币种。所有注单的本金与盈亏均以该资产记账。
pub const SETTLEMENT_ASSET: &str = "USDT";

/// # Summary
/// 注单的系统内唯一标识。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// # Summary
/// 注单的押注方向定义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TradeDirection {
    /// 看涨
    Up,
    /// 看跌
    Down,
}

impl std::str::FromStr for TradeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 历史前端同时存在 "1"/"2" 与方向单词两种编码
        match s.trim().to_lowercase().as_str() {
            "up" | "upward" | "1" => Ok(TradeDirection::Up),
            "down" | "downward" | "2" => Ok(TradeDirection::Down),
            other => Err(format!("Unknown trade direction: {}", other)),
        }
    }
}

/// # Summary
/// 注单的生命周期状态。
///
/// # Invariants
/// - 状态机只允许 `Pending -> Win` 或 `Pending -> Loss`，均为终态。
/// - 已终结的注单状态不可再变化（Win 与 Loss 之间不可互换）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum TradeStatus {
    /// 待结算（未到期，或到期但尚无调用方触发结算）
    Pending,
    /// 结算为赢
    Win,
    /// 结算为输
    Loss,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "Pending"),
            TradeStatus::Win => write!(f, "Win"),
            TradeStatus::Loss => write!(f, "Loss"),
        }
    }
}

/// # Summary
/// 结算结论。与 `TradeStatus` 区分开：Outcome 只描述终态，
/// 用于强制指定和结算器返回值，天然排除 Pending。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Outcome {
    Win,
    Loss,
}

impl From<Outcome> for TradeStatus {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Win => TradeStatus::Win,
            Outcome::Loss => TradeStatus::Loss,
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "win" => Ok(Outcome::Win),
            "loss" => Ok(Outcome::Loss),
            other => Err(format!("Unknown outcome: {}", other)),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "Win"),
            Outcome::Loss => write!(f, "Loss"),
        }
    }
}

/// # Summary
/// 单笔短周期二元注单。用户以固定本金押注方向，
/// 在 `created_at + duration_secs` 到期后被结算为 Win 或 Loss 之一。
///
/// # Invariants
/// - `settlement_applied` 单调：只能 false -> true 发生一次，绝不回退。
/// - `profit_amount` 有值当且仅当 `settlement_applied == true`。
/// - `forced_outcome` 仅在 `status == Pending` 期间可以被清除。
/// - `created_at` 创建后不可变；`updated_at` 随每次写入刷新。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// 系统内全局唯一的注单 ID
    pub id: TradeId,
    /// 归属者规范键（入口处已归一化）
    pub owner: OwnerKey,
    /// 标的展示名 (例如 "BTC/USDT")，仅作记录，不参与结算
    pub pair: String,
    /// 押注方向
    pub direction: TradeDirection,
    /// 本金（结算币种计价，必须为正）
    pub stake: Decimal,
    /// 赢时的收益率百分比（例如 40 表示赢得本金的 40%）
    pub payout_ratio: Decimal,
    /// 注单时长（秒），到期时刻为 created_at + duration_secs
    pub duration_secs: i64,
    /// 开仓参考价。仅作记录，结算从不读取该字段
    pub entry_price: Option<Decimal>,
    /// 生命周期状态
    pub status: TradeStatus,
    /// 运营方或账户级标志写入的强制结论，仅在到期时刻被读取
    pub forced_outcome: Option<Outcome>,
    /// 幂等护栏：该注单对应的账本变动是否已经执行
    pub settlement_applied: bool,
    /// 结算时记录的带符号盈亏（赢为 +payout，输为 -stake）
    pub profit_amount: Option<Decimal>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后修改时间
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// # Logic
    /// 创建一笔全新的注单，初始状态为 Pending，未结算、无盈亏记录。
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TradeId,
        owner: OwnerKey,
        pair: String,
        direction: TradeDirection,
        stake: Decimal,
        payout_ratio: Decimal,
        duration_secs: i64,
        entry_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            pair,
            direction,
            stake,
            payout_ratio,
            duration_secs,
            entry_price,
            status: TradeStatus::Pending,
            forced_outcome: None,
            settlement_applied: false,
            profit_amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 注单的到期时刻
    pub fn matures_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.duration_secs)
    }

    /// 在给定时刻判断注单是否已到期
    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        now >= self.matures_at()
    }

    /// # Logic
    /// 计算指定结论下应入账的带符号盈亏：
    /// 赢时只入账收益部分（本金开仓时未扣除，因此不返还本金），
    /// 输时扣除全部本金。
    pub fn profit_for(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Win => self.stake * self.payout_ratio / Decimal::ONE_HUNDRED,
            Outcome::Loss => -self.stake,
        }
    }
}
