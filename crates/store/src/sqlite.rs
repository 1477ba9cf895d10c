use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kessai_core::common::OwnerKey;
use kessai_core::ledger::entity::{Account, AccountRole};
use kessai_core::ledger::port::{Ledger, LedgerError};
use kessai_core::trade::entity::{
    Outcome, SETTLEMENT_ASSET, Trade, TradeDirection, TradeId, TradeStatus,
};
use kessai_core::trade::port::{TradeError, TradeStore};
use rust_decimal::Decimal;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{error, info, warn};

/// 默认系统数据库文件名
const DEFAULT_APP_DB: &str = "app.db";

/// 初始管理员账户的规范键
const ADMIN_OWNER: &str = "admin";

/// # Summary
/// 账户、余额、注单与账本流水的集中式 SQLite 落地。
/// 同一个数据库文件承载 `Ledger` 与 `TradeStore` 两个端口，
/// 因此 `try_settle` 能在单个事务内同时完成注单转换与余额入账。
///
/// # Invariants
/// * 数据库结构在存储实例创建时初始化。
/// * Decimal 以 TEXT 存储，读取失败时按零兜底。
/// * `trades.settlement_applied` 上的条件 UPDATE 是结算竞争的唯一裁决点。
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// 在指定的数据目录下创建 SqliteBackend 并初始化全局表结构。
    ///
    /// # Logic
    /// 1. 确保数据目录存在（通常来自 `AppConfig.database.data_dir`）。
    /// 2. 配置 SQLite 连接选项：自动建库、WAL 日志、写忙等待。
    /// 3. 执行 DDL 初始化表结构。
    /// 4. 若管理员账户缺失，用随机密码开户并打印一次性密码。
    pub async fn new(data_dir: impl AsRef<std::path::Path>) -> Result<Self, LedgerError> {
        let root = data_dir.as_ref();
        std::fs::create_dir_all(root).map_err(|e| LedgerError::InitError(e.to_string()))?;

        let db_path = root.join(DEFAULT_APP_DB);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::InitError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                owner_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                force_password_change INTEGER NOT NULL DEFAULT 0,
                force_trade_win INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS balances (
                owner_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                balance TEXT NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (owner_id, asset)
            );

            CREATE TABLE IF NOT EXISTS owner_aliases (
                alias TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                pair TEXT NOT NULL,
                direction TEXT NOT NULL,
                stake TEXT NOT NULL,
                payout_ratio TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                entry_price TEXT,
                status TEXT NOT NULL,
                forced_outcome TEXT,
                settlement_applied INTEGER NOT NULL DEFAULT 0,
                profit_amount TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_owner ON trades (owner_id, created_at);

            CREATE TABLE IF NOT EXISTS ledger_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                delta TEXT NOT NULL,
                reason TEXT NOT NULL,
                trade_id TEXT,
                created_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| LedgerError::InitError(e.to_string()))?;

        let backend = Self { pool };
        backend.seed_admin().await?;
        Ok(backend)
    }

    /// # Logic
    /// 首次启动时生成管理员账户：随机 16 位密码、强制改密标记。
    /// 密码只在日志里出现这一次。
    async fn seed_admin(&self) -> Result<(), LedgerError> {
        let admin_key = OwnerKey::from_canonical(ADMIN_OWNER);
        if self.get_account(&admin_key).await?.is_some() {
            return Ok(());
        }

        use rand::distr::{Alphanumeric, SampleString};
        let password = Alphanumeric.sample_string(&mut rand::rng(), 16);
        let hashed = bcrypt::hash(&password, bcrypt::DEFAULT_COST)
            .map_err(|e| LedgerError::InitError(format!("bcrypt failure: {}", e)))?;

        // 并发初始化时另一个连接可能已抢先开户
        match self
            .create_account(&admin_key, "Administrator", &hashed, AccountRole::Admin)
            .await
        {
            Ok(_) => {}
            Err(LedgerError::AccountExists(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        self.save_credentials(&admin_key, &hashed, true).await?;

        info!("已生成初始管理员账户 admin，一次性密码: {}", password);
        Ok(())
    }

    /// 注册一条遗留别名到规范键的映射（历史数据导入用）
    pub async fn add_alias(&self, alias: &str, owner: &OwnerKey) -> Result<(), LedgerError> {
        sqlx::query("INSERT OR REPLACE INTO owner_aliases (alias, owner_id) VALUES (?, ?)")
            .bind(alias.trim())
            .bind(owner.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_balances(
        &self,
        owner: &OwnerKey,
    ) -> Result<HashMap<String, Decimal>, LedgerError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT asset, balance FROM balances WHERE owner_id = ?",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(asset, bal)| (asset, Decimal::from_str(&bal).unwrap_or_default()))
            .collect())
    }
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade, TradeError> {
    let col = |e: sqlx::Error| TradeError::InternalError(e.to_string());

    let direction: String = row.try_get("direction").map_err(col)?;
    let status: String = row.try_get("status").map_err(col)?;
    let forced: Option<String> = row.try_get("forced_outcome").map_err(col)?;
    let applied: i64 = row.try_get("settlement_applied").map_err(col)?;
    let stake: String = row.try_get("stake").map_err(col)?;
    let ratio: String = row.try_get("payout_ratio").map_err(col)?;
    let entry_price: Option<String> = row.try_get("entry_price").map_err(col)?;
    let profit: Option<String> = row.try_get("profit_amount").map_err(col)?;
    let owner: String = row.try_get("owner_id").map_err(col)?;

    Ok(Trade {
        id: TradeId(row.try_get("id").map_err(col)?),
        owner: OwnerKey::from_canonical(owner),
        pair: row.try_get("pair").map_err(col)?,
        direction: direction
            .parse::<TradeDirection>()
            .map_err(TradeError::InternalError)?,
        stake: Decimal::from_str(&stake).unwrap_or_default(),
        payout_ratio: Decimal::from_str(&ratio).unwrap_or_default(),
        duration_secs: row.try_get("duration_secs").map_err(col)?,
        entry_price: entry_price.and_then(|p| Decimal::from_str(&p).ok()),
        status: match status.as_str() {
            "Pending" => TradeStatus::Pending,
            "Win" => TradeStatus::Win,
            "Loss" => TradeStatus::Loss,
            other => {
                return Err(TradeError::InternalError(format!(
                    "非法的注单状态存量数据: {}",
                    other
                )));
            }
        },
        forced_outcome: forced.and_then(|o| o.parse::<Outcome>().ok()),
        settlement_applied: applied != 0,
        profit_amount: profit.and_then(|p| Decimal::from_str(&p).ok()),
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(col)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(col)?,
    })
}

fn direction_str(d: TradeDirection) -> &'static str {
    match d {
        TradeDirection::Up => "Up",
        TradeDirection::Down => "Down",
    }
}

fn status_str(s: TradeStatus) -> &'static str {
    match s {
        TradeStatus::Pending => "Pending",
        TradeStatus::Win => "Win",
        TradeStatus::Loss => "Loss",
    }
}

#[async_trait]
impl TradeStore for SqliteBackend {
    async fn save(&self, trade: &Trade) -> Result<(), TradeError> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (id, owner_id, pair, direction, stake, payout_ratio, duration_secs,
                 entry_price, status, forced_outcome, settlement_applied, profit_amount,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id.0)
        .bind(trade.owner.as_str())
        .bind(&trade.pair)
        .bind(direction_str(trade.direction))
        .bind(trade.stake.to_string())
        .bind(trade.payout_ratio.to_string())
        .bind(trade.duration_secs)
        .bind(trade.entry_price.map(|p| p.to_string()))
        .bind(status_str(trade.status))
        .bind(trade.forced_outcome.map(|o| o.to_string()))
        .bind(i64::from(trade.settlement_applied))
        .bind(trade.profit_amount.map(|p| p.to_string()))
        .bind(trade.created_at)
        .bind(trade.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TradeError::InternalError(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, trade_id: &TradeId) -> Result<Option<Trade>, TradeError> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(&trade_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;

        row.map(|r| trade_from_row(&r)).transpose()
    }

    async fn get_by_owner(&self, owner: &OwnerKey, limit: u32) -> Result<Vec<Trade>, TradeError> {
        let rows =
            sqlx::query("SELECT * FROM trades WHERE owner_id = ? ORDER BY created_at DESC LIMIT ?")
                .bind(owner.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| TradeError::InternalError(e.to_string()))?;

        rows.iter().map(trade_from_row).collect()
    }

    /// # Logic
    /// 条件更新：只有仍为 Pending 且未结算的注单才接受强制结论的写入或清除。
    async fn set_forced_outcome(
        &self,
        trade_id: &TradeId,
        outcome: Option<Outcome>,
    ) -> Result<bool, TradeError> {
        let res = sqlx::query(
            r#"
            UPDATE trades SET forced_outcome = ?, updated_at = ?
            WHERE id = ? AND status = 'Pending' AND settlement_applied = 0
            "#,
        )
        .bind(outcome.map(|o| o.to_string()))
        .bind(Utc::now())
        .bind(&trade_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| TradeError::InternalError(e.to_string()))?;

        Ok(res.rows_affected() > 0)
    }

    /// # Logic
    /// 单个事务内：
    /// 1. 对 `settlement_applied = 0` 做条件 UPDATE（CAS 裁决点）。
    ///    零行命中说明竞争失败，立即回滚并返回 false。
    /// 2. 结算币种余额按带符号增量落地，结果为负时向零取整并告警。
    /// 3. 写入账本流水供对账。
    ///
    /// 归属者账户缺失属于数据质量缺陷：注单转换仍然提交，
    /// 只记 error 日志，绝不重试（见账本端口约定）。
    async fn try_settle(
        &self,
        trade_id: &TradeId,
        owner: &OwnerKey,
        outcome: Outcome,
        profit: Decimal,
    ) -> Result<bool, TradeError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;

        let res = sqlx::query(
            r#"
            UPDATE trades
            SET status = ?, settlement_applied = 1, profit_amount = ?, updated_at = ?
            WHERE id = ? AND settlement_applied = 0
            "#,
        )
        .bind(status_str(outcome.into()))
        .bind(profit.to_string())
        .bind(now)
        .bind(&trade_id.0)
        .execute(&mut *tx)
        .await
        .map_err(|e| TradeError::InternalError(e.to_string()))?;

        if res.rows_affected() == 0 {
            // 另一个并发调用方已经结算过，幂等空操作
            tx.rollback()
                .await
                .map_err(|e| TradeError::InternalError(e.to_string()))?;
            return Ok(false);
        }

        let account_exists: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM accounts WHERE owner_id = ?")
                .bind(owner.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| TradeError::InternalError(e.to_string()))?;

        if account_exists.is_none() {
            // 数据质量缺陷：注单归属者没有账户。注单照常终结，余额无从入账。
            error!(
                "结算对账事项: 注单 {} 的归属者 {} 无账户，{} 金额 {} 未入账",
                trade_id, owner, outcome, profit
            );
        } else {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT balance FROM balances WHERE owner_id = ? AND asset = ?")
                    .bind(owner.as_str())
                    .bind(SETTLEMENT_ASSET)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| TradeError::InternalError(e.to_string()))?;

            let old = existing
                .map(|(b,)| Decimal::from_str(&b).unwrap_or_default())
                .unwrap_or_default();
            let mut new_balance = old + profit;
            if new_balance < Decimal::ZERO {
                warn!(
                    "账户 {} 结算后余额为负 ({})，向零取整落地",
                    owner, new_balance
                );
                new_balance = Decimal::ZERO;
            }

            sqlx::query(
                r#"
                INSERT INTO balances (owner_id, asset, balance, updated_at) VALUES (?, ?, ?, ?)
                ON CONFLICT (owner_id, asset) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at
                "#,
            )
            .bind(owner.as_str())
            .bind(SETTLEMENT_ASSET)
            .bind(new_balance.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;

            sqlx::query(
                "INSERT INTO ledger_journal (owner_id, asset, delta, reason, trade_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(owner.as_str())
            .bind(SETTLEMENT_ASSET)
            .bind(profit.to_string())
            .bind("TradeSettled")
            .bind(&trade_id.0)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;

            sqlx::query("UPDATE accounts SET updated_at = ? WHERE owner_id = ?")
                .bind(now)
                .bind(owner.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| TradeError::InternalError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;
        Ok(true)
    }
}

#[async_trait]
impl Ledger for SqliteBackend {
    async fn create_account(
        &self,
        owner: &OwnerKey,
        name: &str,
        password_hash: &str,
        role: AccountRole,
    ) -> Result<Account, LedgerError> {
        let now = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO accounts
                (owner_id, name, password_hash, role, force_password_change, force_trade_win, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(owner.as_str())
        .bind(name)
        .bind(password_hash)
        .bind(role.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(LedgerError::AccountExists(owner.to_string()));
        }

        // 初始化默认的结算币种余额槽位
        sqlx::query(
            "INSERT OR IGNORE INTO balances (owner_id, asset, balance, updated_at) VALUES (?, ?, '0', ?)",
        )
        .bind(owner.as_str())
        .bind(SETTLEMENT_ASSET)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        self.get_account(owner)
            .await?
            .ok_or_else(|| LedgerError::Database("account vanished after insert".into()))
    }

    async fn get_account(&self, owner: &OwnerKey) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                String,
                i64,
                i64,
                DateTime<Utc>,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT owner_id, name, password_hash, role, force_password_change,
                   force_trade_win, created_at, updated_at
            FROM accounts WHERE owner_id = ?
            "#,
        )
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        let Some(r) = row else {
            return Ok(None);
        };

        let balances = self.load_balances(owner).await?;
        Ok(Some(Account {
            owner: OwnerKey::from_canonical(r.0),
            name: r.1,
            password_hash: r.2,
            role: r.3.parse::<AccountRole>().unwrap_or(AccountRole::User),
            force_password_change: r.4 != 0,
            force_trade_win: r.5 != 0,
            balances,
            created_at: r.6,
            updated_at: r.7,
        }))
    }

    /// # Logic
    /// 1. 归一化后直查账户表。
    /// 2. 未命中时回退查询遗留别名映射表（原始串与归一化串都尝试）。
    async fn resolve_owner(&self, raw: &str) -> Result<Option<OwnerKey>, LedgerError> {
        let Some(key) = OwnerKey::normalize(raw) else {
            return Ok(None);
        };

        let direct: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM accounts WHERE owner_id = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        if direct.is_some() {
            return Ok(Some(key));
        }

        let aliased: Option<(String,)> = sqlx::query_as(
            "SELECT owner_id FROM owner_aliases WHERE alias = ? OR alias = ? LIMIT 1",
        )
        .bind(raw.trim())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Ok(aliased.map(|(id,)| OwnerKey::from_canonical(id)))
    }

    /// # Logic
    /// 事务内读改写单条余额记录，结果为负时向零取整；
    /// 每笔变动写入账本流水。
    async fn apply_delta(
        &self,
        owner: &OwnerKey,
        asset: &str,
        delta: Decimal,
        reason: &str,
    ) -> Result<Account, LedgerError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM accounts WHERE owner_id = ?")
            .bind(owner.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        if exists.is_none() {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT balance FROM balances WHERE owner_id = ? AND asset = ?")
                .bind(owner.as_str())
                .bind(asset)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| LedgerError::Database(e.to_string()))?;

        let old = existing
            .map(|(b,)| Decimal::from_str(&b).unwrap_or_default())
            .unwrap_or_default();
        let mut new_balance = old + delta;
        if new_balance < Decimal::ZERO {
            warn!("账户 {} 入账后余额为负 ({})，向零取整落地", owner, new_balance);
            new_balance = Decimal::ZERO;
        }

        sqlx::query(
            r#"
            INSERT INTO balances (owner_id, asset, balance, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (owner_id, asset) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at
            "#,
        )
        .bind(owner.as_str())
        .bind(asset)
        .bind(new_balance.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        sqlx::query(
            "INSERT INTO ledger_journal (owner_id, asset, delta, reason, trade_id, created_at) VALUES (?, ?, ?, ?, NULL, ?)",
        )
        .bind(owner.as_str())
        .bind(asset)
        .bind(delta.to_string())
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        sqlx::query("UPDATE accounts SET updated_at = ? WHERE owner_id = ?")
            .bind(now)
            .bind(owner.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        self.get_account(owner)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(owner.to_string()))
    }

    async fn set_force_win(&self, owner: &OwnerKey, enabled: bool) -> Result<(), LedgerError> {
        let res = sqlx::query(
            "UPDATE accounts SET force_trade_win = ?, updated_at = ? WHERE owner_id = ?",
        )
        .bind(i64::from(enabled))
        .bind(Utc::now())
        .bind(owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        }
        Ok(())
    }

    async fn save_credentials(
        &self,
        owner: &OwnerKey,
        password_hash: &str,
        force_password_change: bool,
    ) -> Result<(), LedgerError> {
        let res = sqlx::query(
            "UPDATE accounts SET password_hash = ?, force_password_change = ?, updated_at = ? WHERE owner_id = ?",
        )
        .bind(password_hash)
        .bind(i64::from(force_password_change))
        .bind(Utc::now())
        .bind(owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        }
        Ok(())
    }
}
