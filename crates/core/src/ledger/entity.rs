use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::OwnerKey;

/// # Summary
/// 账户角色。Admin 拥有运营接口（强制结论、记账贷记等）的调用权限。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRole {
    User,
    Admin,
}

impl std::str::FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "standard" => Ok(AccountRole::User),
            "admin" => Ok(AccountRole::Admin),
            other => Err(format!("Unknown account role: {}", other)),
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRole::User => write!(f, "User"),
            AccountRole::Admin => write!(f, "Admin"),
        }
    }
}

/// # Summary
/// 账户聚合根：归属者规范键、登录凭据、按资产划分的余额映射，
/// 以及账户级"强制赢"标志。
///
/// # Invariants
/// - `owner` 全局唯一，且已经过 `OwnerKey::normalize` 归一化。
/// - 余额意图非负：顺序更新中允许瞬时负值，但入账时刻必须向零取整落地。
/// - 账户由注册/首次登录创建；结算引擎只变更余额与标志，从不删除账户。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// 归属者规范键
    pub owner: OwnerKey,
    /// 显示名称
    pub name: String,
    /// bcrypt 密码散列
    pub password_hash: String,
    /// 账户角色
    pub role: AccountRole,
    /// 是否要求下次登录强制改密
    pub force_password_change: bool,
    /// 资产代码 -> 余额
    pub balances: HashMap<String, Decimal>,
    /// 账户级强制赢标志：置位后该账户所有未来到期的注单都结算为赢
    pub force_trade_win: bool,
    /// 注册时间
    pub created_at: DateTime<Utc>,
    /// 最后修改时间
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// 读取指定资产的当前余额（无记录视为零）
    pub fn balance_of(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }
}
