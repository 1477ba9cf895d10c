//! # `kessai-api` - HTTP API 网关
//!
//! 本 crate 是 Kessai 结算后端的 HTTP/REST 服务入口。
//! 使用 `axum` 构建路由与控制器，通过 `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - 接收来自客户端或浏览器的 HTTP 请求
//! - 执行 JWT / 运营令牌鉴权后分发至 User / Admin 路由组
//! - 调用下层 `SettlementEngine` 与 `Ledger` 完成业务操作
//! - 将领域模型转换为 DTO 返回给前端

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod session;
pub mod types;
