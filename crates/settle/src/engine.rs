use std::sync::Arc;

use kessai_core::common::{OwnerKey, TimeProvider};
use kessai_core::ledger::port::Ledger;
use kessai_core::trade::entity::{
    Outcome, SETTLEMENT_ASSET, Trade, TradeDirection, TradeId, TradeStatus,
};
use kessai_core::trade::port::{TradeError, TradeStore};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// 历史前端不传收益率时的默认值（赢得本金的 40%）
const DEFAULT_PAYOUT_RATIO: Decimal = Decimal::from_parts(40, 0, 0, false, 0);

/// 开仓请求参数
#[derive(Debug, Clone)]
pub struct OpenTradeRequest {
    pub pair: String,
    pub direction: TradeDirection,
    pub stake: Decimal,
    pub duration_secs: i64,
    /// 缺省按 [`DEFAULT_PAYOUT_RATIO`] 取值
    pub payout_ratio: Option<Decimal>,
    /// 开仓参考价，仅作记录
    pub entry_price: Option<Decimal>,
}

/// # Summary
/// `SettlementEngine` 是注单生命周期的唯一调度者：
/// 开仓校验、到期判定、结论裁决、恰好一次的状态转换与账本入账。
/// 所有入口（轮询、显式结算、运营操作）都汇聚到同一条结算路径，
/// 竞争由存储端口的 `try_settle` 条件写裁决。
///
/// # Invariants
/// - 到期之前任何轮询入口都不会推进状态，也不会泄露强制结论。
/// - 同一注单的账本变动至多执行一次。
pub struct SettlementEngine {
    trades: Arc<dyn TradeStore>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn TimeProvider>,
}

impl SettlementEngine {
    pub fn new(
        trades: Arc<dyn TradeStore>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            trades,
            ledger,
            clock,
        }
    }

    /// # Summary
    /// 创建一笔新注单。
    ///
    /// # Logic
    /// 1. 校验参数：本金、时长、收益率必须为正，标的非空。
    /// 2. 校验本金不超过结算币种可用余额（历史实现只做展示性检查，
    ///    本实现收紧为硬性拒绝）。
    /// 3. 以 Pending 状态持久化，开仓不扣除本金。
    pub async fn open_trade(
        &self,
        owner: &OwnerKey,
        req: OpenTradeRequest,
    ) -> Result<Trade, TradeError> {
        if req.stake <= Decimal::ZERO {
            return Err(TradeError::InvalidInput("本金必须为正数".into()));
        }
        if req.duration_secs <= 0 {
            return Err(TradeError::InvalidInput("注单时长必须为正整数秒".into()));
        }
        let payout_ratio = req.payout_ratio.unwrap_or(DEFAULT_PAYOUT_RATIO);
        if payout_ratio <= Decimal::ZERO {
            return Err(TradeError::InvalidInput("收益率必须为正数".into()));
        }
        if req.pair.trim().is_empty() {
            return Err(TradeError::InvalidInput("标的不能为空".into()));
        }

        let account = self
            .ledger
            .get_account(owner)
            .await?
            .ok_or_else(|| TradeError::AccountNotFound(owner.to_string()))?;

        let available = account.balance_of(SETTLEMENT_ASSET);
        if req.stake > available {
            return Err(TradeError::InsufficientFunds {
                required: req.stake,
                actual: available,
            });
        }

        let trade = Trade::new(
            TradeId(uuid::Uuid::new_v4().to_string()),
            owner.clone(),
            req.pair.trim().to_string(),
            req.direction,
            req.stake,
            payout_ratio,
            req.duration_secs,
            req.entry_price,
            self.clock.now(),
        );
        self.trades.save(&trade).await?;

        info!(
            "注单开仓: id={} owner={} stake={} ratio={} duration={}s",
            trade.id, owner, trade.stake, trade.payout_ratio, trade.duration_secs
        );
        Ok(trade)
    }

    /// # Summary
    /// 查询注单状态（懒结算入口）。
    ///
    /// # Logic
    /// 到期且未结算时先机会性推进状态机，再返回读取结果；
    /// 未到期一律报告 Pending，即使强制结论已经写入。
    pub async fn poll_status(&self, trade_id: &TradeId) -> Result<TradeStatus, TradeError> {
        Ok(self.poll(trade_id).await?.status)
    }

    /// # Summary
    /// 查询注单盈亏（懒结算入口）。
    ///
    /// # Returns
    /// * `Some(decimal)` - 已结算的带符号盈亏
    /// * `None` - 未结算，调用方呈现为 "pending"
    pub async fn poll_profit(&self, trade_id: &TradeId) -> Result<Option<Decimal>, TradeError> {
        Ok(self.poll(trade_id).await?.profit_amount)
    }

    /// 按 ID 读取注单（懒结算）
    pub async fn poll(&self, trade_id: &TradeId) -> Result<Trade, TradeError> {
        let trade = self
            .trades
            .get(trade_id)
            .await?
            .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;

        if !trade.settlement_applied && trade.is_matured(self.clock.now()) {
            self.run_settlement(&trade).await?;
            return self
                .trades
                .get(trade_id)
                .await?
                .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()));
        }

        Ok(trade)
    }

    /// # Summary
    /// 归属者的注单列表，列表中的到期注单同样被机会性结算。
    pub async fn list_trades(
        &self,
        owner: &OwnerKey,
        limit: u32,
    ) -> Result<Vec<Trade>, TradeError> {
        let trades = self.trades.get_by_owner(owner, limit).await?;
        let now = self.clock.now();

        let mut needs_refresh = false;
        for trade in &trades {
            if !trade.settlement_applied && trade.is_matured(now) {
                self.run_settlement(trade).await?;
                needs_refresh = true;
            }
        }

        if needs_refresh {
            return self.trades.get_by_owner(owner, limit).await;
        }
        Ok(trades)
    }

    /// # Summary
    /// 显式同步结算请求。
    ///
    /// # Logic
    /// 1. 已结算的注单直接返回当前终态（幂等）。
    /// 2. 未到期时：已写入强制结论或特权调用方可提前结算，
    ///    否则拒绝 `NotMatured`，不产生任何状态变化。
    /// 3. 其余情况走统一结算路径。
    pub async fn settle(&self, trade_id: &TradeId, privileged: bool) -> Result<Trade, TradeError> {
        let trade = self
            .trades
            .get(trade_id)
            .await?
            .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;

        if trade.settlement_applied {
            return Ok(trade);
        }

        let now = self.clock.now();
        if !trade.is_matured(now) && trade.forced_outcome.is_none() && !privileged {
            let remaining = (trade.matures_at() - now).num_seconds().max(1);
            return Err(TradeError::NotMatured {
                remaining_secs: remaining,
            });
        }

        self.run_settlement(&trade).await?;
        self.trades
            .get(trade_id)
            .await?
            .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))
    }

    /// # Summary
    /// 写入强制结论。仅对 Pending 且未结算的注单生效。
    pub async fn force_outcome(
        &self,
        trade_id: &TradeId,
        outcome: Outcome,
    ) -> Result<(), TradeError> {
        self.set_forced(trade_id, Some(outcome)).await
    }

    /// 清除强制结论（同样仅限 Pending 且未结算）
    pub async fn clear_forced_outcome(&self, trade_id: &TradeId) -> Result<(), TradeError> {
        self.set_forced(trade_id, None).await
    }

    /// 设置账户级强制赢标志，只影响之后到期的结算
    pub async fn set_force_win(&self, owner: &OwnerKey, enabled: bool) -> Result<(), TradeError> {
        self.ledger.set_force_win(owner, enabled).await?;
        info!("账户 {} 强制赢标志 -> {}", owner, enabled);
        Ok(())
    }

    async fn set_forced(
        &self,
        trade_id: &TradeId,
        outcome: Option<Outcome>,
    ) -> Result<(), TradeError> {
        // 先区分"不存在"与"状态不允许"
        self.trades
            .get(trade_id)
            .await?
            .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;

        let updated = self.trades.set_forced_outcome(trade_id, outcome).await?;
        if !updated {
            return Err(TradeError::InvalidTradeState(
                "注单已结算，强制结论不可再变更".into(),
            ));
        }
        Ok(())
    }

    /// # Logic
    /// 统一结算路径（所有入口汇聚于此）：
    /// 1. 读取账户级强制赢标志（账户缺失按 false 处理并告警，
    ///    存储层会在 CAS 命中后记录对账事项）。
    /// 2. 裁决结论并计算带符号盈亏。
    /// 3. 调用 `try_settle` 条件写；竞争失败是预期内的幂等空操作。
    async fn run_settlement(&self, trade: &Trade) -> Result<(), TradeError> {
        let force_win = match self.ledger.get_account(&trade.owner).await {
            Ok(Some(account)) => account.force_trade_win,
            Ok(None) => {
                warn!("注单 {} 的归属者 {} 无账户记录", trade.id, trade.owner);
                false
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = crate::resolver::resolve(trade, force_win);
        let profit = trade.profit_for(outcome);

        let won = self
            .trades
            .try_settle(&trade.id, &trade.owner, outcome, profit)
            .await?;

        if won {
            info!(
                "注单结算: id={} outcome={} profit={} owner={}",
                trade.id, outcome, profit, trade.owner
            );
        } else {
            debug!("注单 {} 的结算竞争已被其他调用方赢得", trade.id);
        }
        Ok(())
    }
}
