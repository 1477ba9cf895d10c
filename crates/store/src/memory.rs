use async_trait::async_trait;
use chrono::Utc;
use kessai_core::common::OwnerKey;
use kessai_core::ledger::entity::{Account, AccountRole};
use kessai_core::ledger::port::{Ledger, LedgerError};
use kessai_core::trade::entity::{Outcome, SETTLEMENT_ASSET, Trade, TradeId, TradeStatus};
use kessai_core::trade::port::{TradeError, TradeStore};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};

/// 账本流水的内存表示（对账测试用）
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub owner: OwnerKey,
    pub asset: String,
    pub delta: Decimal,
    pub reason: String,
    pub trade_id: Option<TradeId>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<OwnerKey, Account>,
    trades: HashMap<TradeId, Trade>,
    aliases: HashMap<String, OwnerKey>,
    journal: Vec<JournalEntry>,
}

/// # Summary
/// 基于内存的 `Ledger` + `TradeStore` 双端口实现，服务于测试与嵌入场景。
///
/// # Invariants
/// - 账户与注单共用同一把写锁，`try_settle` 在锁内一次性完成
///   CAS 裁决与余额入账，满足端口的原子性约定。
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// 注册一条遗留别名映射
    pub async fn add_alias(&self, alias: &str, owner: &OwnerKey) {
        self.inner
            .write()
            .await
            .aliases
            .insert(alias.trim().to_string(), owner.clone());
    }

    /// 读取全部账本流水（测试断言用）
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.inner.read().await.journal.clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn floored(owner: &OwnerKey, value: Decimal) -> Decimal {
    if value < Decimal::ZERO {
        warn!("账户 {} 入账后余额为负 ({})，向零取整落地", owner, value);
        Decimal::ZERO
    } else {
        value
    }
}

#[async_trait]
impl TradeStore for MemoryBackend {
    async fn save(&self, trade: &Trade) -> Result<(), TradeError> {
        self.inner
            .write()
            .await
            .trades
            .insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn get(&self, trade_id: &TradeId) -> Result<Option<Trade>, TradeError> {
        Ok(self.inner.read().await.trades.get(trade_id).cloned())
    }

    async fn get_by_owner(&self, owner: &OwnerKey, limit: u32) -> Result<Vec<Trade>, TradeError> {
        let guard = self.inner.read().await;
        let mut trades: Vec<Trade> = guard
            .trades
            .values()
            .filter(|t| t.owner == *owner)
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades.truncate(limit.try_into().unwrap_or(usize::MAX));
        Ok(trades)
    }

    async fn set_forced_outcome(
        &self,
        trade_id: &TradeId,
        outcome: Option<Outcome>,
    ) -> Result<bool, TradeError> {
        let mut guard = self.inner.write().await;
        let Some(trade) = guard.trades.get_mut(trade_id) else {
            return Ok(false);
        };
        if trade.status != TradeStatus::Pending || trade.settlement_applied {
            return Ok(false);
        }
        trade.forced_outcome = outcome;
        trade.updated_at = Utc::now();
        Ok(true)
    }

    /// # Logic
    /// 写锁内一次性完成：CAS 裁决（settlement_applied 护栏）、
    /// 注单终态写入、余额入账与流水记录。
    async fn try_settle(
        &self,
        trade_id: &TradeId,
        owner: &OwnerKey,
        outcome: Outcome,
        profit: Decimal,
    ) -> Result<bool, TradeError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();

        let Some(trade) = guard.trades.get_mut(trade_id) else {
            return Err(TradeError::TradeNotFound(trade_id.to_string()));
        };
        if trade.settlement_applied {
            return Ok(false);
        }
        trade.status = outcome.into();
        trade.settlement_applied = true;
        trade.profit_amount = Some(profit);
        trade.updated_at = now;

        match guard.accounts.get_mut(owner) {
            Some(account) => {
                let old = account.balance_of(SETTLEMENT_ASSET);
                let new_balance = floored(owner, old + profit);
                account
                    .balances
                    .insert(SETTLEMENT_ASSET.to_string(), new_balance);
                account.updated_at = now;
                guard.journal.push(JournalEntry {
                    owner: owner.clone(),
                    asset: SETTLEMENT_ASSET.to_string(),
                    delta: profit,
                    reason: "TradeSettled".to_string(),
                    trade_id: Some(trade_id.clone()),
                });
            }
            None => {
                error!(
                    "结算对账事项: 注单 {} 的归属者 {} 无账户，{} 金额 {} 未入账",
                    trade_id, owner, outcome, profit
                );
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl Ledger for MemoryBackend {
    async fn create_account(
        &self,
        owner: &OwnerKey,
        name: &str,
        password_hash: &str,
        role: AccountRole,
    ) -> Result<Account, LedgerError> {
        let mut guard = self.inner.write().await;
        if guard.accounts.contains_key(owner) {
            return Err(LedgerError::AccountExists(owner.to_string()));
        }
        let now = Utc::now();
        let mut balances = HashMap::new();
        balances.insert(SETTLEMENT_ASSET.to_string(), Decimal::ZERO);
        let account = Account {
            owner: owner.clone(),
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            role,
            force_password_change: false,
            balances,
            force_trade_win: false,
            created_at: now,
            updated_at: now,
        };
        guard.accounts.insert(owner.clone(), account.clone());
        Ok(account)
    }

    async fn get_account(&self, owner: &OwnerKey) -> Result<Option<Account>, LedgerError> {
        Ok(self.inner.read().await.accounts.get(owner).cloned())
    }

    async fn resolve_owner(&self, raw: &str) -> Result<Option<OwnerKey>, LedgerError> {
        let Some(key) = OwnerKey::normalize(raw) else {
            return Ok(None);
        };
        let guard = self.inner.read().await;
        if guard.accounts.contains_key(&key) {
            return Ok(Some(key));
        }
        Ok(guard.aliases.get(raw.trim()).cloned())
    }

    async fn apply_delta(
        &self,
        owner: &OwnerKey,
        asset: &str,
        delta: Decimal,
        reason: &str,
    ) -> Result<Account, LedgerError> {
        let mut guard = self.inner.write().await;
        let Some(account) = guard.accounts.get_mut(owner) else {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        };
        let old = account.balance_of(asset);
        let new_balance = floored(owner, old + delta);
        account.balances.insert(asset.to_string(), new_balance);
        account.updated_at = Utc::now();
        let snapshot = account.clone();
        guard.journal.push(JournalEntry {
            owner: owner.clone(),
            asset: asset.to_string(),
            delta,
            reason: reason.to_string(),
            trade_id: None,
        });
        Ok(snapshot)
    }

    async fn set_force_win(&self, owner: &OwnerKey, enabled: bool) -> Result<(), LedgerError> {
        let mut guard = self.inner.write().await;
        let Some(account) = guard.accounts.get_mut(owner) else {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        };
        account.force_trade_win = enabled;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn save_credentials(
        &self,
        owner: &OwnerKey,
        password_hash: &str,
        force_password_change: bool,
    ) -> Result<(), LedgerError> {
        let mut guard = self.inner.write().await;
        let Some(account) = guard.accounts.get_mut(owner) else {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        };
        account.password_hash = password_hash.to_string();
        account.force_password_change = force_password_change;
        account.updated_at = Utc::now();
        Ok(())
    }
}
