use super::entity::{Account, AccountRole};
use crate::common::OwnerKey;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// # Summary
/// 账本存储层错误枚举。
#[derive(Error, Debug)]
pub enum LedgerError {
    /// 账户不存在（别名匹配也未命中）
    #[error("账户不存在: {0}")]
    AccountNotFound(String),
    /// 账户已存在，重复开户
    #[error("账户已存在: {0}")]
    AccountExists(String),
    /// 数据库操作失败
    #[error("Database error: {0}")]
    Database(String),
    /// 初始化存储失败
    #[error("Initialization error: {0}")]
    InitError(String),
}

/// # Summary
/// 账本端口：管理账户与按资产划分的余额。
/// 结算引擎、运营贷记等多个互不相干的流程都会并发变更同一余额，
/// 因此每次变更必须是针对单条余额记录的原子增量，而非整个账户文档的读改写。
///
/// # Invariants
/// - `apply_delta` 对每笔结算至多被调用一次（由注单侧的幂等护栏保证）。
/// - 入账结果向零取整：增量导致负余额时落地为零并记录告警。
#[async_trait]
pub trait Ledger: Send + Sync {
    /// # Summary
    /// 开户。
    ///
    /// # Returns
    /// 若规范键已存在返回 `LedgerError::AccountExists`。
    async fn create_account(
        &self,
        owner: &OwnerKey,
        name: &str,
        password_hash: &str,
        role: AccountRole,
    ) -> Result<Account, LedgerError>;

    /// 按规范键读取账户
    async fn get_account(&self, owner: &OwnerKey) -> Result<Option<Account>, LedgerError>;

    /// # Summary
    /// 将任意历史别名解析为规范键。
    ///
    /// # Logic
    /// 1. 先做 `OwnerKey::normalize` 归一化后直查账户表。
    /// 2. 未命中时回退查询遗留别名映射表。
    async fn resolve_owner(&self, raw: &str) -> Result<Option<OwnerKey>, LedgerError>;

    /// # Summary
    /// 向指定资产余额入账一笔带符号增量，并刷新更新时间戳。
    ///
    /// # Logic
    /// 单条余额记录的原子增量；结果为负时向零取整落地。
    /// 每笔变动写入账本流水供对账使用。
    ///
    /// # Returns
    /// * `Ok(Account)` - 变更后的账户快照
    /// * `Err(AccountNotFound)` - 归属者不存在，调用方记录日志且不得重试
    async fn apply_delta(
        &self,
        owner: &OwnerKey,
        asset: &str,
        delta: Decimal,
        reason: &str,
    ) -> Result<Account, LedgerError>;

    /// 设置或清除账户级强制赢标志。只影响之后到期的结算，不回溯已终结注单。
    async fn set_force_win(&self, owner: &OwnerKey, enabled: bool) -> Result<(), LedgerError>;

    /// 保存账户凭据类字段（密码散列、强制改密标记）
    async fn save_credentials(
        &self,
        owner: &OwnerKey,
        password_hash: &str,
        force_password_change: bool,
    ) -> Result<(), LedgerError>;
}
