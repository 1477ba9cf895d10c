//! # `kessai-core` - 领域核心
//!
//! 本 crate 承载结算系统的纯领域模型：交易实体、账本实体、
//! 异步端口 (Port) 抽象以及各领域的错误枚举。
//! 不包含任何 I/O 实现，所有基础设施通过 `crates/store` 等适配器接入。

pub mod common;
pub mod config;
pub mod ledger;
pub mod trade;
