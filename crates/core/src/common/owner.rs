use serde::{Deserialize, Serialize};

/// # Summary
/// 账户归属者的系统内唯一规范键。
/// 历史数据中同一个用户可能以 `userid` / `uid` / 数字串 / 钱包地址等
/// 多种别名出现，本类型在入口处一次性归一化，下游不再做多别名查询。
///
/// # Invariants
/// - 同一逻辑用户的所有别名必须归一化为同一个 `OwnerKey`。
/// - 归一化后的键不含首尾空白；数字串不含前导零；`0x` 地址全小写。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct OwnerKey(String);

impl OwnerKey {
    /// # Logic
    /// 将任意来源的归属者标识归一化为规范键：
    /// 1. 去除首尾空白。
    /// 2. 纯数字串按十进制数值重写（消除 `007` 与 `7` 的歧义）。
    /// 3. `0x` 开头的钱包地址统一为全小写。
    /// 4. 其余字符串原样保留（大小写敏感的用户名）。
    ///
    /// 空白串返回 `None`，由调用方按 `InvalidInput` 处理。
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            // 超长数字串（如毫秒时间戳拼接的历史 ID）用 u128 足够覆盖
            if let Ok(n) = trimmed.parse::<u128>() {
                return Some(Self(n.to_string()));
            }
        }

        // get(..2) 而非字节切片：首字符为多字节时索引 2 不是字符边界
        if trimmed.len() > 2
            && trimmed
                .get(..2)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("0x"))
        {
            return Some(Self(trimmed.to_ascii_lowercase()));
        }

        Some(Self(trimmed.to_string()))
    }

    /// 直接以已规范化的字符串构造（仅限存储层回读时使用）
    pub fn from_canonical(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_aliases_collapse() {
        let a = OwnerKey::normalize("007").unwrap();
        let b = OwnerKey::normalize("  7 ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "7");
    }

    #[test]
    fn wallet_addresses_are_lowercased() {
        let a = OwnerKey::normalize("0xAbCd1234").unwrap();
        let b = OwnerKey::normalize("0xabcd1234").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn usernames_keep_case() {
        let a = OwnerKey::normalize("Trader_01").unwrap();
        assert_eq!(a.as_str(), "Trader_01");
    }

    #[test]
    fn multibyte_usernames_are_preserved() {
        let a = OwnerKey::normalize("中文用户").unwrap();
        assert_eq!(a.as_str(), "中文用户");
        // 双字节首字符 + 长度超过 2 字节也不会触碰非字符边界
        let b = OwnerKey::normalize("é7").unwrap();
        assert_eq!(b.as_str(), "é7");
    }

    #[test]
    fn blank_is_rejected() {
        assert!(OwnerKey::normalize("   ").is_none());
    }
}
