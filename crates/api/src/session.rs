//! # 运营令牌会话
//!
//! 运营端不走 JWT，而是使用服务端保存的不透明令牌：
//! 令牌本身只返回给调用方一次，服务端仅保存其 SHA-256 摘要，
//! 即使会话表泄露也无法还原可用令牌。

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use kessai_core::common::OwnerKey;

/// 会话表容量上限，超出后拒绝颁发而不是悄悄淘汰有效会话
const MAX_SESSIONS: usize = 1024;

/// 单个运营会话
#[derive(Debug, Clone)]
struct AdminSession {
    owner: OwnerKey,
    expires_at: DateTime<Utc>,
}

/// # Summary
/// 运营令牌的颁发与校验。
///
/// # Invariants
/// - 表中键为令牌摘要，明文令牌从不落地。
/// - 过期会话在颁发与校验路径上被惰性清除，无后台任务。
pub struct AdminTokenService {
    sessions: DashMap<String, AdminSession>,
    ttl: Duration,
}

impl AdminTokenService {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// # Summary
    /// 为指定运营账户颁发一个新令牌。
    ///
    /// # Returns
    /// * `Some(token)` - 明文令牌，调用方负责传递给客户端
    /// * `None` - 会话表已满（先清理过期会话仍无空位）
    pub fn issue(&self, owner: &OwnerKey) -> Option<String> {
        if self.sessions.len() >= MAX_SESSIONS {
            self.purge_expired();
            if self.sessions.len() >= MAX_SESSIONS {
                tracing::warn!("运营会话表已满，拒绝颁发新令牌");
                return None;
            }
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.insert(
            Self::digest(&token),
            AdminSession {
                owner: owner.clone(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        Some(token)
    }

    /// 校验令牌，命中且未过期时返回其归属的运营账户
    pub fn verify(&self, token: &str) -> Option<OwnerKey> {
        let key = Self::digest(token);
        let session = self.sessions.get(&key)?;
        if session.expires_at < Utc::now() {
            drop(session);
            self.sessions.remove(&key);
            return None;
        }
        Some(session.owner.clone())
    }

    /// 令牌有效期（秒），供登录响应回显
    pub fn ttl_secs(&self) -> u64 {
        u64::try_from(self.ttl.num_seconds()).unwrap_or(0)
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, s| s.expires_at >= now);
    }

    fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_back_to_owner() {
        let svc = AdminTokenService::new(3600);
        let owner = OwnerKey::from_canonical("admin");
        let token = svc.issue(&owner).unwrap_or_default();
        assert_eq!(svc.verify(&token), Some(owner));
    }

    #[test]
    fn unknown_or_expired_token_is_rejected() {
        let svc = AdminTokenService::new(-1);
        let owner = OwnerKey::from_canonical("admin");
        let token = svc.issue(&owner).unwrap_or_default();
        assert_eq!(svc.verify(&token), None);
        assert_eq!(svc.verify("deadbeef"), None);
    }
}
