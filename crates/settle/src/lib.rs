//! # `kessai-settle` - 结算引擎
//!
//! 二元注单的状态机核心：到期判定、结论裁决、恰好一次的账本入账。
//! 结算没有专职调度线程，由任何触达到期注单的请求（状态轮询、
//! 盈亏轮询、显式结算、运营操作）机会性驱动；并发触发之间的竞争
//! 由注单存储端口的 `try_settle` 条件写裁决。

pub mod engine;
pub mod resolver;

pub use engine::{OpenTradeRequest, SettlementEngine};
