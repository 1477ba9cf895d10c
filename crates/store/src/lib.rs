//! # `kessai-store` - 持久化适配器
//!
//! 为 `kessai-core` 的 `Ledger` / `TradeStore` 端口提供两套实现：
//! - [`sqlite::SqliteBackend`]：生产用的 SQLite 落地（WAL 模式，Decimal 以 TEXT 存储）。
//! - [`memory::MemoryBackend`]：测试与嵌入场景用的内存实现。
//!
//! 两套实现都满足端口对 `try_settle` 的原子性约定。

pub mod memory;
pub mod sqlite;
