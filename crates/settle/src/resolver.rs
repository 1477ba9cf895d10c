use kessai_core::trade::entity::{Outcome, Trade};

/// # Summary
/// 为到期注单裁决结论。纯函数，无任何副作用。
///
/// # Logic
/// 优先级自上而下，首个命中者生效：
/// 1. 注单上的强制结论 (`forced_outcome`)。
/// 2. 账户级强制赢标志。
/// 3. 默认输。
///
/// 裁决从不比较行情价格。历史实现中存在一条与标志路径互相矛盾的
/// 价格比较路径，这里以标志路径为准则。
///
/// # Invariants
/// - 调用方必须保证注单已到期（或调用方持有特权）；
///   本函数不做到期检查，提前调用会导致结论提前泄露。
pub fn resolve(trade: &Trade, account_force_win: bool) -> Outcome {
    if let Some(forced) = trade.forced_outcome {
        return forced;
    }
    if account_force_win {
        return Outcome::Win;
    }
    Outcome::Loss
}
