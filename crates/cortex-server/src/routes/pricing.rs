//! pricing.* procedures

use cortex_payments::{catalog, CreditPack, PricingPlan};
use serde::Deserialize;

use crate::error::{ApiResult, Rpc};
use crate::input::Input;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanIdInput {
    pub plan_id: String,
}

pub async fn get_plans() -> ApiResult<&'static [PricingPlan]> {
    Ok(Rpc(catalog::plans()))
}

pub async fn get_credit_packs() -> ApiResult<&'static [CreditPack]> {
    Ok(Rpc(catalog::credit_packs()))
}

/// Unknown ids answer null rather than an error
pub async fn get_plan_by_id(Input(input): Input<PlanIdInput>) -> ApiResult<Option<&'static PricingPlan>> {
    Ok(Rpc(catalog::plan_by_id(&input.plan_id)))
}
