use super::entity::{Outcome, Trade, TradeId};
use crate::common::OwnerKey;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// # Summary
/// 注单域可能发生的错误。
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("注单不存在: {0}")]
    TradeNotFound(String),
    #[error("账户不存在: {0}")]
    AccountNotFound(String),
    #[error("请求参数非法: {0}")]
    InvalidInput(String),
    #[error("注单尚未到期，剩余 {remaining_secs} 秒")]
    NotMatured { remaining_secs: i64 },
    #[error("可用资金不足. 需要: {required}, 实际: {actual}")]
    InsufficientFunds {
        required: Decimal,
        actual: Decimal,
    },
    #[error("注单状态不允许该操作: {0}")]
    InvalidTradeState(String),
    #[error("内部系统错误: {0}")]
    InternalError(String),
}

/// 账本侧错误进入注单域时的折算
impl From<crate::ledger::port::LedgerError> for TradeError {
    fn from(err: crate::ledger::port::LedgerError) -> Self {
        match err {
            crate::ledger::port::LedgerError::AccountNotFound(owner) => {
                TradeError::AccountNotFound(owner)
            }
            other => TradeError::InternalError(other.to_string()),
        }
    }
}

/// # Summary
/// 注单持久化端口。持有注单实体及其生命周期字段，
/// 并暴露结算所依赖的条件更新原语 `try_settle`。
///
/// # Invariants
/// - 此接口必须是异步且线程安全的 (`Send + Sync`)，多个请求处理器会并发触达同一注单。
/// - `try_settle` 是本子系统唯一的正确性关键同步原语。
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// 持久化一笔新建注单
    async fn save(&self, trade: &Trade) -> Result<(), TradeError>;

    /// 按 ID 读取注单
    async fn get(&self, trade_id: &TradeId) -> Result<Option<Trade>, TradeError>;

    /// 按归属者读取注单列表（按创建时间倒序，最多 `limit` 条）
    async fn get_by_owner(&self, owner: &OwnerKey, limit: u32) -> Result<Vec<Trade>, TradeError>;

    /// # Summary
    /// 写入或清除强制结论。
    ///
    /// # Logic
    /// 条件更新：仅当注单仍为 Pending 且未结算时生效。
    ///
    /// # Returns
    /// * `Ok(true)` - 写入成功
    /// * `Ok(false)` - 注单已结算或已终结，写入被拒绝
    async fn set_forced_outcome(
        &self,
        trade_id: &TradeId,
        outcome: Option<Outcome>,
    ) -> Result<bool, TradeError>;

    /// # Summary
    /// 结算的唯一共享原语：对 `settlement_applied` 执行一次 CAS 式条件写。
    ///
    /// # Logic
    /// 在单个原子单元内完成：
    /// 1. 仅当 `settlement_applied == false` 时，将注单置为终态
    ///    (`status = outcome`)、记录 `profit_amount = profit` 并把护栏置 true。
    /// 2. 将 `profit` 作为带符号增量入账到归属者的结算币种余额。
    ///
    /// 若条件写未命中任何记录，说明另一个并发调用方已经赢得结算竞争，
    /// 此时不产生任何账本变动。
    /// 若归属者账户缺失（数据质量缺陷），注单转换仍然提交，
    /// 实现必须以 error 级日志记录该对账事项且不得重试。
    ///
    /// # Returns
    /// * `Ok(true)` - 本调用方赢得结算，账本变动已执行
    /// * `Ok(false)` - 竞争失败，无任何状态变化（幂等空操作）
    async fn try_settle(
        &self,
        trade_id: &TradeId,
        owner: &OwnerKey,
        outcome: Outcome,
        profit: Decimal,
    ) -> Result<bool, TradeError>;
}
