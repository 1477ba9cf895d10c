use serde::{Deserialize, Serialize};

/// # Summary
/// 结算后端的全局配置。由 `crates/app` 启动时通过 `config` crate
/// 从配置文件与 `KESSAI__*` 环境变量分层加载，任何字段缺失时整体回退默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

/// HTTP 服务与鉴权相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT 签名密钥。默认值仅供开发，生产部署必须覆盖
    pub jwt_secret: String,
    /// 运营令牌（X-Admin-Token 会话）的有效期，秒
    pub admin_session_ttl_secs: i64,
}

/// 存储层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite 数据文件所在目录（账户、注单与账本流水共用一个 app.db）
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                jwt_secret: "YOUR_SUPER_SECRET_KEY".to_string(),
                admin_session_ttl_secs: 3600,
            },
            database: DatabaseConfig {
                data_dir: "data".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_development_safe() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.admin_session_ttl_secs, 3600);
        assert_eq!(config.database.data_dir, "data");
    }
}
