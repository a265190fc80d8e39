//! Plan catalog lookups.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use focus_billing_core::{BillingError, PlanConfiguration};
use focus_billing_store::Store;

use super::storage_failure;

/// Read-only view of purchasable plans.
#[derive(Clone)]
pub struct PlanCatalog {
    store: Arc<dyn Store>,
}

impl PlanCatalog {
    /// Create a catalog backed by `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Look up a plan that can be purchased at `now`.
    ///
    /// # Errors
    ///
    /// `PlanNotFound` for unknown ids, `PlanUnavailable` for inactive or
    /// expired plans.
    pub async fn get_available_plan(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PlanConfiguration, BillingError> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await
            .map_err(|e| storage_failure("get_plan", &e))?
            .ok_or_else(|| BillingError::PlanNotFound {
                plan_id: plan_id.to_string(),
            })?;

        if !plan.is_available_at(now) {
            return Err(BillingError::PlanUnavailable {
                plan_id: plan_id.to_string(),
            });
        }
        Ok(plan)
    }

    /// Every plan purchasable at `now`, in display order.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the store fails.
    pub async fn list_available_plans(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlanConfiguration>, BillingError> {
        let plans = self
            .store
            .list_plans()
            .await
            .map_err(|e| storage_failure("list_plans", &e))?;
        Ok(plans.into_iter().filter(|p| p.is_available_at(now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use focus_billing_core::{BillingPeriod, Tier};
    use focus_billing_store::MemoryStore;

    fn plan(plan_id: &str, display_order: i32) -> PlanConfiguration {
        PlanConfiguration {
            plan_id: plan_id.into(),
            name: plan_id.into(),
            tier: Tier::Pro,
            billing_period: BillingPeriod::Monthly,
            amount: 19_900,
            currency: "INR".into(),
            external_plan_id: format!("plan_{plan_id}"),
            is_active: true,
            available_until: None,
            display_order,
        }
    }

    #[tokio::test]
    async fn unavailable_plans_are_filtered_and_rejected() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        store.put_plan(plan("pro_yearly", 2)).await;
        store.put_plan(plan("pro_monthly", 1)).await;
        let mut retired = plan("pro_launch", 0);
        retired.available_until = Some(now - Duration::days(1));
        store.put_plan(retired).await;

        let catalog = PlanCatalog::new(store);
        let ids: Vec<_> = catalog
            .list_available_plans(now)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.plan_id)
            .collect();
        assert_eq!(ids, vec!["pro_monthly", "pro_yearly"]);

        let err = catalog.get_available_plan("pro_launch", now).await.unwrap_err();
        assert!(matches!(err, BillingError::PlanUnavailable { .. }));

        let err = catalog.get_available_plan("gold", now).await.unwrap_err();
        assert!(matches!(err, BillingError::PlanNotFound { .. }));
    }
}
