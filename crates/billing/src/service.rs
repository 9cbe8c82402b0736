//! Subscription service
//!
//! Owns the per-tenant subscription lifecycle: lazy creation, premium
//! upgrade, cancellation, and the mobile app build state machine.
//!
//! ```text
//! pending   --request-->            building
//! building  --build succeeds-->     completed
//! building  --build fails-->        failed
//! building  --deadline passes-->    failed (sweep) / building (new request)
//! completed --request-->            ready, no transition
//! failed    --request-->            building (retry)
//! ```

use eduhub_shared::TenantId;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::model::{
    BuildOutcome, BuildResult, MobileAppRequestOutcome, PaymentDetails, Subscription,
};
use crate::pg_store::PgSubscriptionStore;
use crate::plans::{SubscriptionPolicy, ESTIMATED_BUILD_TIME};
use crate::queue::{BuildQueue, BuildRequest, PgBuildQueue};
use crate::store::SubscriptionStore;

const QUEUE_FAILURE_REASON: &str = "build request could not be queued";
const STALE_BUILD_REASON: &str = "build timed out";

pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    queue: Arc<dyn BuildQueue>,
    policy: SubscriptionPolicy,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        queue: Arc<dyn BuildQueue>,
        policy: SubscriptionPolicy,
    ) -> Self {
        Self { store, queue, policy }
    }

    /// Service backed by PostgreSQL for both records and the build queue
    pub fn postgres(pool: PgPool, policy: SubscriptionPolicy) -> Self {
        Self::new(
            Arc::new(PgSubscriptionStore::new(pool.clone())),
            Arc::new(PgBuildQueue::new(pool)),
            policy,
        )
    }

    pub fn policy(&self) -> &SubscriptionPolicy {
        &self.policy
    }

    pub async fn ping(&self) -> SubscriptionResult<()> {
        self.store.ping().await
    }

    /// Get a tenant's subscription, creating the default basic one on first access
    pub async fn get_or_create(&self, tenant_id: &TenantId) -> SubscriptionResult<Subscription> {
        if let Some(existing) = self.store.find(tenant_id).await? {
            return Ok(existing);
        }

        let fresh = Subscription::new_default(tenant_id.clone(), OffsetDateTime::now_utc(), &self.policy);
        let stored = self.store.insert_if_absent(&fresh).await?;
        info!(
            tenant_id = %tenant_id,
            plan = %stored.plan_type,
            end_date = %stored.period.end_date,
            "Created default subscription"
        );
        Ok(stored)
    }

    /// Upgrade to premium and record the payment.
    /// Not deduplicated: repeating the call records another payment.
    pub async fn upgrade_to_premium(
        &self,
        tenant_id: &TenantId,
        details: &PaymentDetails,
    ) -> SubscriptionResult<Subscription> {
        let mut subscription = self
            .store
            .find(tenant_id)
            .await?
            .ok_or_else(|| SubscriptionError::NotFound(tenant_id.to_string()))?;

        let payment = subscription.apply_premium_upgrade(details, OffsetDateTime::now_utc());
        self.store.save_upgrade(&subscription, &payment).await?;

        info!(
            tenant_id = %tenant_id,
            amount_cents = payment.amount_cents,
            method = payment.method.as_deref().unwrap_or("unspecified"),
            "Upgraded subscription to premium"
        );
        Ok(subscription)
    }

    /// Cancel the current period. Access checks fail from now on.
    pub async fn cancel(&self, tenant_id: &TenantId) -> SubscriptionResult<Subscription> {
        let mut subscription = self
            .store
            .find(tenant_id)
            .await?
            .ok_or_else(|| SubscriptionError::NotFound(tenant_id.to_string()))?;

        let now = OffsetDateTime::now_utc();
        subscription.cancel(now);
        self.store
            .save_period(tenant_id, &subscription.period, now)
            .await?;

        info!(tenant_id = %tenant_id, "Cancelled subscription");
        Ok(subscription)
    }

    /// Request the tenant's branded mobile app.
    ///
    /// Returns the ready artifact, reports an in-flight build, or queues a new
    /// build. Only one caller can move a tenant into `building`.
    pub async fn request_mobile_app(
        &self,
        tenant_id: &TenantId,
    ) -> SubscriptionResult<MobileAppRequestOutcome> {
        let subscription = self
            .store
            .find(tenant_id)
            .await?
            .ok_or(SubscriptionError::Forbidden)?;

        if !subscription.can_access_mobile_app() {
            return Err(SubscriptionError::Forbidden);
        }

        let now = OffsetDateTime::now_utc();
        if subscription.build_in_flight(now, self.policy.build_deadline) {
            return Ok(MobileAppRequestOutcome::AlreadyBuilding);
        }

        if let Some(download_url) = subscription.ready_app() {
            return Ok(MobileAppRequestOutcome::Ready {
                download_url: download_url.to_string(),
                version: subscription.mobile_app.version.clone(),
            });
        }

        let build_id = Uuid::new_v4();
        let stale_before = now - self.policy.build_deadline;
        if !self
            .store
            .try_begin_build(tenant_id, build_id, now, stale_before)
            .await?
        {
            // Another request won the transition
            return Ok(MobileAppRequestOutcome::AlreadyBuilding);
        }

        let request = BuildRequest {
            build_id,
            tenant_id: tenant_id.clone(),
            requested_at: now,
        };

        if let Err(e) = self.queue.publish(&request).await {
            error!(
                tenant_id = %tenant_id,
                build_id = %build_id,
                error = %e,
                "Failed to queue mobile app build"
            );
            let failed = BuildResult::Failed {
                reason: QUEUE_FAILURE_REASON.to_string(),
            };
            if let Err(revert_err) = self
                .store
                .finish_build(tenant_id, build_id, &failed, OffsetDateTime::now_utc())
                .await
            {
                error!(
                    tenant_id = %tenant_id,
                    build_id = %build_id,
                    error = %revert_err,
                    "Failed to release build state after queue failure"
                );
            }
            return Err(match e {
                SubscriptionError::BuildTrigger(msg) => SubscriptionError::BuildTrigger(msg),
                other => SubscriptionError::BuildTrigger(other.to_string()),
            });
        }

        info!(tenant_id = %tenant_id, build_id = %build_id, "Queued mobile app build");
        Ok(MobileAppRequestOutcome::BuildStarted {
            build_id,
            estimated_time: ESTIMATED_BUILD_TIME,
        })
    }

    /// Record the result of a build attempt.
    ///
    /// Returns `None` when the report belongs to an attempt that is no longer
    /// in flight (superseded or already swept); such reports change nothing.
    pub async fn complete_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        outcome: BuildOutcome,
    ) -> SubscriptionResult<Option<Subscription>> {
        let result = BuildResult::resolve(outcome, tenant_id, &self.policy);
        let applied = self
            .store
            .finish_build(tenant_id, build_id, &result, OffsetDateTime::now_utc())
            .await?;

        if !applied {
            if self.store.find(tenant_id).await?.is_none() {
                return Err(SubscriptionError::NotFound(tenant_id.to_string()));
            }
            warn!(
                tenant_id = %tenant_id,
                build_id = %build_id,
                "Ignoring result for a build that is no longer in flight"
            );
            return Ok(None);
        }

        match &result {
            BuildResult::Succeeded { version, download_url } => info!(
                tenant_id = %tenant_id,
                build_id = %build_id,
                version = %version,
                download_url = %download_url,
                "Mobile app build completed"
            ),
            BuildResult::Failed { reason } => warn!(
                tenant_id = %tenant_id,
                build_id = %build_id,
                reason = %reason,
                "Mobile app build failed"
            ),
        }

        self.store.find(tenant_id).await
    }

    /// Whether `build_id` is still the tenant's in-flight build attempt.
    /// Workers check this before running a queued job.
    pub async fn is_current_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
    ) -> SubscriptionResult<bool> {
        Ok(self.store.find(tenant_id).await?.is_some_and(|sub| {
            sub.mobile_app.build_status.is_building() && sub.mobile_app.build_id == Some(build_id)
        }))
    }

    /// Active premium tenants holding the mobile app feature
    pub async fn list_premium_tenants(&self) -> SubscriptionResult<Vec<Subscription>> {
        self.store.list_premium().await
    }

    /// Expire active subscriptions whose period has ended
    pub async fn expire_lapsed(&self, now: OffsetDateTime) -> SubscriptionResult<u64> {
        let expired = self.store.expire_lapsed(now).await?;
        if expired > 0 {
            info!(expired, "Expired lapsed subscriptions");
        }
        Ok(expired)
    }

    /// Fail builds that passed the build deadline without reporting back
    pub async fn fail_stale_builds(&self, now: OffsetDateTime) -> SubscriptionResult<u64> {
        let stale_before = now - self.policy.build_deadline;
        let failed = self
            .store
            .fail_stale_builds(stale_before, STALE_BUILD_REASON, now)
            .await?;
        if failed > 0 {
            warn!(failed, "Failed mobile app builds that exceeded the deadline");
        }
        Ok(failed)
    }
}
