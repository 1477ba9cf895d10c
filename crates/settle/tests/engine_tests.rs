use std::sync::Arc;

use chrono::Utc;
use kessai_core::common::{FakeClockProvider, OwnerKey, TimeProvider};
use kessai_core::ledger::entity::AccountRole;
use kessai_core::ledger::port::Ledger;
use kessai_core::trade::entity::{Outcome, SETTLEMENT_ASSET, TradeDirection, TradeStatus};
use kessai_core::trade::port::TradeError;
use kessai_settle::{OpenTradeRequest, SettlementEngine};
use kessai_store::memory::MemoryBackend;
use rust_decimal_macros::dec;

struct Harness {
    engine: SettlementEngine,
    backend: Arc<MemoryBackend>,
    clock: Arc<FakeClockProvider>,
    owner: OwnerKey,
}

/// 测试夹具：内存后端 + 虚拟时钟 + 一个有 1000 USDT 的账户
async fn harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(FakeClockProvider::new(Utc::now()));
    let engine = SettlementEngine::new(backend.clone(), backend.clone(), clock.clone());

    let owner = OwnerKey::from_canonical("10086");
    backend
        .create_account(&owner, "Trader", "hash", AccountRole::User)
        .await
        .unwrap();
    backend
        .apply_delta(&owner, SETTLEMENT_ASSET, dec!(1000), "TestSeed")
        .await
        .unwrap();

    Harness {
        engine,
        backend,
        clock,
        owner,
    }
}

fn open_req(stake: rust_decimal::Decimal, duration_secs: i64) -> OpenTradeRequest {
    OpenTradeRequest {
        pair: "BTC/USDT".to_string(),
        direction: TradeDirection::Up,
        stake,
        duration_secs,
        payout_ratio: None,
        entry_price: None,
    }
}

#[tokio::test]
async fn open_rejects_stake_beyond_balance() {
    let h = harness().await;
    let err = h
        .engine
        .open_trade(&h.owner, open_req(dec!(1001), 60))
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::InsufficientFunds { .. }));

    // 开仓不扣本金，余额原封不动
    let account = h.backend.get_account(&h.owner).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(1000));
}

#[tokio::test]
async fn open_rejects_nonpositive_parameters() {
    let h = harness().await;
    assert!(matches!(
        h.engine.open_trade(&h.owner, open_req(dec!(0), 60)).await,
        Err(TradeError::InvalidInput(_))
    ));
    assert!(matches!(
        h.engine.open_trade(&h.owner, open_req(dec!(10), 0)).await,
        Err(TradeError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn default_outcome_is_loss_and_stake_is_debited() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 60))
        .await
        .unwrap();

    // 到期前轮询：状态保持 Pending，无任何账本变动
    assert_eq!(
        h.engine.poll_status(&trade.id).await.unwrap(),
        TradeStatus::Pending
    );
    assert_eq!(h.engine.poll_profit(&trade.id).await.unwrap(), None);

    h.clock.advance_secs(61);
    assert_eq!(
        h.engine.poll_status(&trade.id).await.unwrap(),
        TradeStatus::Loss
    );
    assert_eq!(
        h.engine.poll_profit(&trade.id).await.unwrap(),
        Some(dec!(-100))
    );

    let account = h.backend.get_account(&h.owner).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(900));
}

#[tokio::test]
async fn forced_win_pays_ratio_of_stake() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 60))
        .await
        .unwrap();

    h.engine
        .force_outcome(&trade.id, Outcome::Win)
        .await
        .unwrap();

    // 强制结论写入后到期前轮询仍然只报告 Pending（结论不提前泄露）
    assert_eq!(
        h.engine.poll_status(&trade.id).await.unwrap(),
        TradeStatus::Pending
    );

    h.clock.advance_secs(60);
    assert_eq!(
        h.engine.poll_status(&trade.id).await.unwrap(),
        TradeStatus::Win
    );

    // 默认收益率 40%：本金 100 赢得 40，本金未在开仓时扣除
    let account = h.backend.get_account(&h.owner).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(1040));
    assert_eq!(
        h.engine.poll_profit(&trade.id).await.unwrap(),
        Some(dec!(40))
    );
}

#[tokio::test]
async fn account_force_win_flag_applies_to_future_settlements() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(50), 30))
        .await
        .unwrap();

    h.engine.set_force_win(&h.owner, true).await.unwrap();
    h.clock.advance_secs(31);

    assert_eq!(
        h.engine.poll_status(&trade.id).await.unwrap(),
        TradeStatus::Win
    );
    let account = h.backend.get_account(&h.owner).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(1020));
}

#[tokio::test]
async fn explicit_settle_rejects_before_maturity() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 60))
        .await
        .unwrap();

    let err = h.engine.settle(&trade.id, false).await.unwrap_err();
    assert!(matches!(err, TradeError::NotMatured { .. }));

    // 拒绝不产生任何状态变化
    let current = h.engine.poll(&trade.id).await.unwrap();
    assert_eq!(current.status, TradeStatus::Pending);
    assert!(!current.settlement_applied);
}

#[tokio::test]
async fn forced_outcome_allows_early_explicit_settle() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 3600))
        .await
        .unwrap();

    h.engine
        .force_outcome(&trade.id, Outcome::Win)
        .await
        .unwrap();

    // 未到期，但强制结论已写入，显式结算放行
    let settled = h.engine.settle(&trade.id, false).await.unwrap();
    assert_eq!(settled.status, TradeStatus::Win);
    assert!(settled.settlement_applied);
}

#[tokio::test]
async fn privileged_settle_bypasses_maturity() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 3600))
        .await
        .unwrap();

    let settled = h.engine.settle(&trade.id, true).await.unwrap();
    assert_eq!(settled.status, TradeStatus::Loss);
}

#[tokio::test]
async fn settle_is_idempotent_after_terminal_state() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 10))
        .await
        .unwrap();
    h.clock.advance_secs(11);

    let first = h.engine.settle(&trade.id, false).await.unwrap();
    let second = h.engine.settle(&trade.id, false).await.unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(first.profit_amount, second.profit_amount);

    // 账本只动了一次
    let journal = h.backend.journal().await;
    let settlements: Vec<_> = journal
        .iter()
        .filter(|e| e.reason == "TradeSettled")
        .collect();
    assert_eq!(settlements.len(), 1);
}

#[tokio::test]
async fn forced_outcome_rejected_after_settlement() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 10))
        .await
        .unwrap();
    h.clock.advance_secs(11);
    let _ = h.engine.settle(&trade.id, false).await.unwrap();

    let err = h
        .engine
        .force_outcome(&trade.id, Outcome::Win)
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::InvalidTradeState(_)));

    // 终态单调：清除同样被拒绝
    assert!(h.engine.clear_forced_outcome(&trade.id).await.is_err());
}

#[tokio::test]
async fn list_trades_settles_matured_entries() {
    let h = harness().await;
    let t1 = h
        .engine
        .open_trade(&h.owner, open_req(dec!(10), 10))
        .await
        .unwrap();
    h.clock.advance_secs(5);
    let t2 = h
        .engine
        .open_trade(&h.owner, open_req(dec!(10), 3600))
        .await
        .unwrap();

    h.clock.advance_secs(6);
    let trades = h.engine.list_trades(&h.owner, 10).await.unwrap();
    assert_eq!(trades.len(), 2);

    let find = |id| trades.iter().find(|t| t.id == id).unwrap();
    assert_eq!(find(t1.id.clone()).status, TradeStatus::Loss);
    assert_eq!(find(t2.id.clone()).status, TradeStatus::Pending);
}

/// 核心性质：N 个并发轮询同时触达同一笔到期注单，账本变动恰好一次。
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_polls_settle_exactly_once() {
    let h = harness().await;
    let trade = h
        .engine
        .open_trade(&h.owner, open_req(dec!(100), 10))
        .await
        .unwrap();
    h.clock.advance_secs(11);

    let engine = Arc::new(h.engine);
    let mut handles = vec![];
    for _ in 0..32 {
        let engine = engine.clone();
        let id = trade.id.clone();
        handles.push(tokio::spawn(async move {
            engine.poll_status(&id).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), TradeStatus::Loss);
    }

    // 余额恰好扣除一次本金
    let account = h.backend.get_account(&h.owner).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(900));

    let journal = h.backend.journal().await;
    let settlements: Vec<_> = journal
        .iter()
        .filter(|e| e.reason == "TradeSettled")
        .collect();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].delta, dec!(-100));
}

#[tokio::test]
async fn missing_owner_account_still_settles_trade() {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(FakeClockProvider::new(Utc::now()));
    let engine = SettlementEngine::new(backend.clone(), backend.clone(), clock.clone());

    // 绕过开仓校验，直接落一笔归属者缺失的注单（历史数据质量缺陷）
    let ghost = OwnerKey::from_canonical("ghost");
    let trade = kessai_core::trade::entity::Trade::new(
        kessai_core::trade::entity::TradeId("orphan".to_string()),
        ghost,
        "BTC/USDT".to_string(),
        TradeDirection::Down,
        dec!(100),
        dec!(40),
        10,
        None,
        clock.now(),
    );
    kessai_core::trade::port::TradeStore::save(backend.as_ref(), &trade)
        .await
        .unwrap();

    clock.advance_secs(11);
    assert_eq!(
        engine.poll_status(&trade.id).await.unwrap(),
        TradeStatus::Loss
    );

    // 无账户可入账，流水为空
    assert!(backend.journal().await.is_empty());
}
