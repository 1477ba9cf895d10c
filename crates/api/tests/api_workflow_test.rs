use std::sync::Arc;

use kessai_api::server::{AppState, serve_on};
use kessai_api::session::AdminTokenService;
use kessai_api::types::{
    AccountResponse, AdminLoginResponse, ApiResponse, ChangePasswordRequest, CreateAccountRequest,
    CreateTradeRequest, CreditRequest, ForceOutcomeRequest, LoginRequest, LoginResponse,
    TradeProfitResponse, TradeResponse, TradeStatusResponse,
};
use kessai_core::common::{FakeClockProvider, OwnerKey};
use kessai_core::ledger::port::Ledger;
use kessai_core::trade::entity::SETTLEMENT_ASSET;
use kessai_settle::SettlementEngine;
use kessai_store::sqlite::SqliteBackend;
use reqwest::StatusCode;
use rust_decimal_macros::dec;
use tokio::net::TcpListener;

struct TestServer {
    base_url: String,
    backend: Arc<SqliteBackend>,
    clock: Arc<FakeClockProvider>,
    _tmp: tempfile::TempDir,
}

// 帮助函数：在随机端口启动测试服务器
async fn spawn_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let backend = Arc::new(SqliteBackend::new(tmp_dir.path()).await.unwrap());

    // 强制覆盖 admin 的随机初始密码为已知测试密码 "test_admin_pwd"
    let admin = OwnerKey::from_canonical("admin");
    let hashed = bcrypt::hash("test_admin_pwd", bcrypt::DEFAULT_COST).unwrap();
    backend.save_credentials(&admin, &hashed, true).await.unwrap();

    let clock = Arc::new(FakeClockProvider::new(chrono::Utc::now()));
    let engine = Arc::new(SettlementEngine::new(
        backend.clone(),
        backend.clone(),
        clock.clone(),
    ));

    let state = AppState {
        engine,
        ledger: backend.clone(),
        admin_sessions: Arc::new(AdminTokenService::new(3600)),
        app_config: Arc::new(kessai_core::config::AppConfig::default()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let base_url = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        serve_on(state, listener).await.unwrap();
    });

    // 稍微等待服务器启动
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    TestServer {
        base_url,
        backend,
        clock,
        _tmp: tmp_dir,
    }
}

#[tokio::test]
async fn test_full_api_workflow() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let srv = spawn_test_server().await;
    let client = reqwest::Client::new();
    let base_url = &srv.base_url;

    // ============================================
    // Case 1: 登录失败 (密码错误)
    // ============================================
    let res = client
        .post(format!("{}/api/v1/auth/login", base_url))
        .json(&LoginRequest {
            username: "admin".to_string(),
            password: "wrongpassword".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // ============================================
    // Case 2: 成功登录 Admin (JWT)
    // ============================================
    let res = client
        .post(format!("{}/api/v1/auth/login", base_url))
        .json(&LoginRequest {
            username: "admin".to_string(),
            password: "test_admin_pwd".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let login_data: ApiResponse<LoginResponse> = res.json().await.unwrap();
    let admin_jwt = login_data.data.unwrap().token;

    // ============================================
    // Case 3: 强制锁定 (Force Password Change Lock)
    // ============================================
    let res = client
        .get(format!("{}/api/v1/user/trades", base_url))
        .bearer_auth(&admin_jwt)
        .send()
        .await
        .unwrap();
    assert_eq!(
        res.status(),
        StatusCode::FORBIDDEN,
        "未改密码即访问业务被拒绝"
    );

    // ============================================
    // Case 4: 修改密码成功
    // ============================================
    let res = client
        .post(format!("{}/api/v1/auth/change_password", base_url))
        .bearer_auth(&admin_jwt)
        .json(&ChangePasswordRequest {
            old_password: "test_admin_pwd".to_string(),
            new_password: "new_secure_password".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // ============================================
    // Case 5: 运营登录，获取 X-Admin-Token
    // ============================================
    let res = client
        .post(format!("{}/api/v1/admin/login", base_url))
        .json(&LoginRequest {
            username: "admin".to_string(),
            password: "new_secure_password".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let admin_login: ApiResponse<AdminLoginResponse> = res.json().await.unwrap();
    let admin_token = admin_login.data.unwrap().token;

    // 无令牌访问运营接口被拒绝
    let res = client
        .post(format!("{}/api/v1/admin/users", base_url))
        .json(&CreateAccountRequest {
            id: "nobody".to_string(),
            name: "Nobody".to_string(),
            password: "whatever123".to_string(),
            role: "User".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // ============================================
    // Case 6: 开户 + 入账
    // ============================================
    let res = client
        .post(format!("{}/api/v1/admin/users", base_url))
        .header("X-Admin-Token", &admin_token)
        .json(&CreateAccountRequest {
            id: "trader_01".to_string(),
            name: "Trader One".to_string(),
            password: "trader_password".to_string(),
            role: "User".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/api/v1/admin/users/trader_01/credit", base_url))
        .header("X-Admin-Token", &admin_token)
        .json(&CreditRequest {
            asset: None,
            amount: "1000".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let credited: ApiResponse<AccountResponse> = res.json().await.unwrap();
    assert_eq!(credited.data.unwrap().balance, "1000");

    // ============================================
    // Case 7: Trader 登录 + 解锁
    // ============================================
    let res = client
        .post(format!("{}/api/v1/auth/login", base_url))
        .json(&LoginRequest {
            username: "trader_01".to_string(),
            password: "trader_password".to_string(),
        })
        .send()
        .await
        .unwrap();
    let trader_login: ApiResponse<LoginResponse> = res.json().await.unwrap();
    let trader_jwt = trader_login.data.unwrap().token;

    let res = client
        .post(format!("{}/api/v1/auth/change_password", base_url))
        .bearer_auth(&trader_jwt)
        .json(&ChangePasswordRequest {
            old_password: "trader_password".to_string(),
            new_password: "trader_new_pwd".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // ============================================
    // Case 8: 开仓
    // ============================================
    let res = client
        .post(format!("{}/api/v1/user/trades", base_url))
        .bearer_auth(&trader_jwt)
        .json(&CreateTradeRequest {
            pair: "BTC/USDT".to_string(),
            direction: "up".to_string(),
            stake: "100".to_string(),
            duration_secs: 60,
            payout_ratio: None,
            entry_price: Some("65000".to_string()),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let opened: ApiResponse<TradeResponse> = res.json().await.unwrap();
    let trade_id = opened.data.unwrap().id;

    // 本金超出余额被拒绝
    let res = client
        .post(format!("{}/api/v1/user/trades", base_url))
        .bearer_auth(&trader_jwt)
        .json(&CreateTradeRequest {
            pair: "BTC/USDT".to_string(),
            direction: "down".to_string(),
            stake: "99999".to_string(),
            duration_secs: 60,
            payout_ratio: None,
            entry_price: None,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // ============================================
    // Case 9: 到期前：Pending、盈亏 "pending"、显式结算 409
    // ============================================
    let res = client
        .get(format!(
            "{}/api/v1/user/trades/{}/status",
            base_url, trade_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    let status: ApiResponse<TradeStatusResponse> = res.json().await.unwrap();
    assert_eq!(status.data.unwrap().status, "Pending");

    // 运营写入强制结论后，到期前轮询仍然只报告 Pending
    let res = client
        .post(format!(
            "{}/api/v1/admin/trades/{}/outcome",
            base_url, trade_id
        ))
        .header("X-Admin-Token", &admin_token)
        .json(&ForceOutcomeRequest {
            outcome: "win".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!(
            "{}/api/v1/user/trades/{}/profit",
            base_url, trade_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    let profit: ApiResponse<TradeProfitResponse> = res.json().await.unwrap();
    assert_eq!(profit.data.unwrap().profit, "pending");

    // ============================================
    // Case 10: 到期后轮询结算，强制结论生效
    // ============================================
    srv.clock.advance_secs(61);

    let res = client
        .get(format!(
            "{}/api/v1/user/trades/{}/status",
            base_url, trade_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    let status: ApiResponse<TradeStatusResponse> = res.json().await.unwrap();
    assert_eq!(status.data.unwrap().status, "Win");

    let res = client
        .get(format!(
            "{}/api/v1/user/trades/{}/profit",
            base_url, trade_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    let profit: ApiResponse<TradeProfitResponse> = res.json().await.unwrap();
    assert_eq!(profit.data.unwrap().profit, "40");

    // 余额恰好入账一次收益
    let trader_key = srv
        .backend
        .resolve_owner("trader_01")
        .await
        .unwrap()
        .unwrap();
    let account = srv.backend.get_account(&trader_key).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(1040));

    // 重复显式结算幂等返回终态
    let res = client
        .post(format!(
            "{}/api/v1/user/trades/{}/settle",
            base_url, trade_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let settled: ApiResponse<TradeResponse> = res.json().await.unwrap();
    assert_eq!(settled.data.unwrap().status, "Win");
    let account = srv.backend.get_account(&trader_key).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(1040));

    // 已结算后强制结论不可再变更
    let res = client
        .delete(format!(
            "{}/api/v1/admin/trades/{}/outcome",
            base_url, trade_id
        ))
        .header("X-Admin-Token", &admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // ============================================
    // Case 11: 未到期结算 409 与运营特权结算
    // ============================================
    let res = client
        .post(format!("{}/api/v1/user/trades", base_url))
        .bearer_auth(&trader_jwt)
        .json(&CreateTradeRequest {
            pair: "ETH/USDT".to_string(),
            direction: "2".to_string(),
            stake: "50".to_string(),
            duration_secs: 3600,
            payout_ratio: Some("80".to_string()),
            entry_price: None,
        })
        .send()
        .await
        .unwrap();
    let opened: ApiResponse<TradeResponse> = res.json().await.unwrap();
    let second_id = opened.data.unwrap().id;

    let res = client
        .post(format!(
            "{}/api/v1/user/trades/{}/settle",
            base_url, second_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT, "未到期结算被拒绝");

    let res = client
        .post(format!(
            "{}/api/v1/admin/trades/{}/settle",
            base_url, second_id
        ))
        .header("X-Admin-Token", &admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let settled: ApiResponse<TradeResponse> = res.json().await.unwrap();
    // 无强制结论、无账户标志：默认输，扣除本金
    assert_eq!(settled.data.unwrap().status, "Loss");
    let account = srv.backend.get_account(&trader_key).await.unwrap().unwrap();
    assert_eq!(account.balance_of(SETTLEMENT_ASSET), dec!(990));

    // ============================================
    // Case 12: 归属隔离 - 他人注单拒绝访问
    // ============================================
    let res = client
        .post(format!("{}/api/v1/admin/users", base_url))
        .header("X-Admin-Token", &admin_token)
        .json(&CreateAccountRequest {
            id: "trader_02".to_string(),
            name: "Trader Two".to_string(),
            password: "trader2_password".to_string(),
            role: "User".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/api/v1/auth/login", base_url))
        .json(&LoginRequest {
            username: "trader_02".to_string(),
            password: "trader2_password".to_string(),
        })
        .send()
        .await
        .unwrap();
    let other_login: ApiResponse<LoginResponse> = res.json().await.unwrap();
    let other_jwt = other_login.data.unwrap().token;
    client
        .post(format!("{}/api/v1/auth/change_password", base_url))
        .bearer_auth(&other_jwt)
        .json(&ChangePasswordRequest {
            old_password: "trader2_password".to_string(),
            new_password: "trader2_new_pwd".to_string(),
        })
        .send()
        .await
        .unwrap();

    let res = client
        .get(format!(
            "{}/api/v1/user/trades/{}/status",
            base_url, trade_id
        ))
        .bearer_auth(&other_jwt)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // ============================================
    // Case 13: 账户级强制赢标志
    // ============================================
    let res = client
        .put(format!(
            "{}/api/v1/admin/users/trader_01/force_win",
            base_url
        ))
        .header("X-Admin-Token", &admin_token)
        .json(&serde_json::json!({ "enabled": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/api/v1/user/trades", base_url))
        .bearer_auth(&trader_jwt)
        .json(&CreateTradeRequest {
            pair: "BTC/USDT".to_string(),
            direction: "up".to_string(),
            stake: "100".to_string(),
            duration_secs: 30,
            payout_ratio: None,
            entry_price: None,
        })
        .send()
        .await
        .unwrap();
    let opened: ApiResponse<TradeResponse> = res.json().await.unwrap();
    let third_id = opened.data.unwrap().id;

    srv.clock.advance_secs(31);
    let res = client
        .get(format!(
            "{}/api/v1/user/trades/{}/status",
            base_url, third_id
        ))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    let status: ApiResponse<TradeStatusResponse> = res.json().await.unwrap();
    assert_eq!(status.data.unwrap().status, "Win");

    // ============================================
    // Case 14: 注单列表
    // ============================================
    let res = client
        .get(format!("{}/api/v1/user/trades?limit=10", base_url))
        .bearer_auth(&trader_jwt)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let list: ApiResponse<Vec<TradeResponse>> = res.json().await.unwrap();
    assert_eq!(list.data.unwrap().len(), 3);
}
