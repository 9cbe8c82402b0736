//! Storage traits for subscription records.
//!
//! `PgSubscriptionStore` (see `pg_store`) backs production; the in-memory
//! store implements the same contract for tests and local development.

use async_trait::async_trait;
use eduhub_shared::{BuildStatus, PeriodStatus, TenantId};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::model::{BuildResult, Period, PaymentRecord, Subscription};

/// Persistence for tenant subscriptions.
///
/// Every mutating method is atomic per tenant. In particular
/// `try_begin_build` must be a single conditional update, never a read
/// followed by a write.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Check that the backing store is reachable
    async fn ping(&self) -> SubscriptionResult<()>;

    async fn find(&self, tenant_id: &TenantId) -> SubscriptionResult<Option<Subscription>>;

    /// Insert the record unless one already exists for the tenant.
    /// Returns whichever record is stored afterwards.
    async fn insert_if_absent(&self, subscription: &Subscription) -> SubscriptionResult<Subscription>;

    /// Persist plan, features and pricing and append the payment in one unit
    async fn save_upgrade(
        &self,
        subscription: &Subscription,
        payment: &PaymentRecord,
    ) -> SubscriptionResult<()>;

    async fn save_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        now: OffsetDateTime,
    ) -> SubscriptionResult<()>;

    /// Move the build state to `building` under `build_id` unless another
    /// build started at or after `stale_before` is still in flight.
    /// Returns `false` when the transition was not made.
    async fn try_begin_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> SubscriptionResult<bool>;

    /// Record a build result if `build_id` is still the in-flight attempt.
    /// Returns `false` when the result was ignored.
    async fn finish_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        result: &BuildResult,
        now: OffsetDateTime,
    ) -> SubscriptionResult<bool>;

    /// Active premium subscriptions with the mobile app feature
    async fn list_premium(&self) -> SubscriptionResult<Vec<Subscription>>;

    /// Mark active subscriptions whose period ended before `now` as expired
    async fn expire_lapsed(&self, now: OffsetDateTime) -> SubscriptionResult<u64>;

    /// Fail builds that started before `stale_before` and never reported back
    async fn fail_stale_builds(
        &self,
        stale_before: OffsetDateTime,
        reason: &str,
        now: OffsetDateTime,
    ) -> SubscriptionResult<u64>;
}

/// In-memory subscription store
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<TenantId, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a record wholesale (test setup and operator overrides)
    pub fn put(&self, subscription: Subscription) -> SubscriptionResult<()> {
        self.write()?
            .insert(subscription.tenant_id.clone(), subscription);
        Ok(())
    }

    fn read(&self) -> SubscriptionResult<RwLockReadGuard<'_, HashMap<TenantId, Subscription>>> {
        self.subscriptions
            .read()
            .map_err(|_| SubscriptionError::Storage("subscription store lock poisoned".to_string()))
    }

    fn write(&self) -> SubscriptionResult<RwLockWriteGuard<'_, HashMap<TenantId, Subscription>>> {
        self.subscriptions
            .write()
            .map_err(|_| SubscriptionError::Storage("subscription store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn ping(&self) -> SubscriptionResult<()> {
        self.read().map(|_| ())
    }

    async fn find(&self, tenant_id: &TenantId) -> SubscriptionResult<Option<Subscription>> {
        Ok(self.read()?.get(tenant_id).cloned())
    }

    async fn insert_if_absent(&self, subscription: &Subscription) -> SubscriptionResult<Subscription> {
        let mut subscriptions = self.write()?;
        let stored = subscriptions
            .entry(subscription.tenant_id.clone())
            .or_insert_with(|| subscription.clone());
        Ok(stored.clone())
    }

    async fn save_upgrade(
        &self,
        subscription: &Subscription,
        payment: &PaymentRecord,
    ) -> SubscriptionResult<()> {
        let mut subscriptions = self.write()?;
        let stored = subscriptions
            .get_mut(&subscription.tenant_id)
            .ok_or_else(|| SubscriptionError::NotFound(subscription.tenant_id.to_string()))?;
        stored.plan_type = subscription.plan_type;
        stored.features = subscription.features;
        stored.pricing = subscription.pricing.clone();
        stored.payment_history.push(payment.clone());
        stored.updated_at = subscription.updated_at;
        Ok(())
    }

    async fn save_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        now: OffsetDateTime,
    ) -> SubscriptionResult<()> {
        let mut subscriptions = self.write()?;
        let stored = subscriptions
            .get_mut(tenant_id)
            .ok_or_else(|| SubscriptionError::NotFound(tenant_id.to_string()))?;
        stored.period = period.clone();
        stored.updated_at = now;
        Ok(())
    }

    async fn try_begin_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> SubscriptionResult<bool> {
        let mut subscriptions = self.write()?;
        let Some(stored) = subscriptions.get_mut(tenant_id) else {
            return Ok(false);
        };
        if !stored.can_begin_build(stale_before) {
            return Ok(false);
        }
        stored.begin_build(build_id, now);
        Ok(true)
    }

    async fn finish_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        result: &BuildResult,
        now: OffsetDateTime,
    ) -> SubscriptionResult<bool> {
        let mut subscriptions = self.write()?;
        Ok(subscriptions
            .get_mut(tenant_id)
            .map(|stored| stored.finish_build(build_id, result, now))
            .unwrap_or(false))
    }

    async fn list_premium(&self) -> SubscriptionResult<Vec<Subscription>> {
        let mut premium: Vec<Subscription> = self
            .read()?
            .values()
            .filter(|s| s.is_active_premium())
            .cloned()
            .collect();
        premium.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(premium)
    }

    async fn expire_lapsed(&self, now: OffsetDateTime) -> SubscriptionResult<u64> {
        let mut expired = 0;
        for stored in self.write()?.values_mut() {
            if stored.period.status == PeriodStatus::Active && stored.period.end_date < now {
                stored.period.status = PeriodStatus::Expired;
                stored.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn fail_stale_builds(
        &self,
        stale_before: OffsetDateTime,
        reason: &str,
        now: OffsetDateTime,
    ) -> SubscriptionResult<u64> {
        let mut failed = 0;
        for stored in self.write()?.values_mut() {
            if stored.mobile_app.build_status == BuildStatus::Building
                && stored.can_begin_build(stale_before)
            {
                stored.mobile_app.build_status = BuildStatus::Failed;
                stored.mobile_app.failure_reason = Some(reason.to_string());
                stored.updated_at = now;
                failed += 1;
            }
        }
        Ok(failed)
    }
}
