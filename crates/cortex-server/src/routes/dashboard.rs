//! dashboard.* procedures

use axum::extract::State;
use chrono::{DateTime, Datelike, Utc};
use cortex_core::{Permission, PlanTier, UsageStore};
use cortex_payments::catalog;
use serde::Serialize;

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult, Rpc};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub token_balance: i64,
    pub tokens_used_this_month: i64,
    pub plan: PlanTier,
    pub plan_name: &'static str,
    /// Monthly token quota, -1 for unlimited
    pub token_limit: i64,
    pub api_calls_this_month: i64,
}

pub async fn get_stats(State(state): State<AppState>, caller: Caller) -> ApiResult<DashboardStats> {
    caller.require(Permission::Read)?;
    let user = caller.user;
    let plan = catalog::plan_for_tier(user.subscription_plan);

    let since = start_of_month(Utc::now()).ok_or_else(ApiError::internal)?;
    let api_calls_this_month = state.store.count_usage_since(user.id, since).await?;

    Ok(Rpc(DashboardStats {
        token_balance: user.token_balance,
        tokens_used_this_month: user.tokens_used_this_month,
        plan: user.subscription_plan,
        plan_name: plan.name,
        token_limit: plan.limits.tokens_per_month,
        api_calls_this_month,
    }))
}

/// Midnight UTC on the first day of `now`'s month
fn start_of_month(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_start_of_month() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 13, 45, 10).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(start_of_month(now), Some(expected));
    }
}
