//! Plan catalog handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use focus_billing_core::{BillingPeriod, PlanConfiguration, Tier};

use crate::error::ApiError;
use crate::state::AppState;

/// A purchasable plan.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    /// Catalog plan id.
    pub plan_id: String,
    /// Display name.
    pub name: String,
    /// Tier granted.
    pub tier: Tier,
    /// Billing period.
    pub billing_period: BillingPeriod,
    /// Price per cycle in minor units.
    pub amount: i64,
    /// Currency.
    pub currency: String,
}

impl From<PlanConfiguration> for PlanResponse {
    fn from(plan: PlanConfiguration) -> Self {
        Self {
            plan_id: plan.plan_id,
            name: plan.name,
            tier: plan.tier,
            billing_period: plan.billing_period,
            amount: plan.amount,
            currency: plan.currency,
        }
    }
}

/// Plan list response.
#[derive(Debug, Serialize)]
pub struct PlanListResponse {
    /// Plans in display order.
    pub plans: Vec<PlanResponse>,
}

/// List plans that can be purchased now.
pub async fn list_plans(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlanListResponse>, ApiError> {
    let plans = state
        .lifecycle
        .catalog()
        .list_available_plans(Utc::now())
        .await?;

    Ok(Json(PlanListResponse {
        plans: plans.into_iter().map(PlanResponse::from).collect(),
    }))
}
