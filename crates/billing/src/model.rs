//! Subscription record and the state transitions applied to it

use eduhub_shared::{BuildStatus, PaymentStatus, PeriodStatus, PlanType, TenantId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::plans::{self, Features, SubscriptionPolicy};

/// Price charged for the current plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub monthly_price_cents: i64,
    pub currency: String,
}

impl Pricing {
    pub fn for_plan(plan: PlanType) -> Self {
        Self {
            monthly_price_cents: plans::monthly_price_cents(plan),
            currency: plans::DEFAULT_CURRENCY.to_string(),
        }
    }

    /// Monthly price in major currency units
    pub fn monthly_price(&self) -> f64 {
        self.monthly_price_cents as f64 / 100.0
    }
}

/// Current subscription period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub status: PeriodStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
}

/// Branded mobile app build state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MobileAppBuild {
    pub has_custom_app: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub generated_at: Option<OffsetDateTime>,
    pub version: Option<String>,
    pub download_url: Option<String>,
    pub build_status: BuildStatus,
    /// Identifies the in-flight (or most recent) build attempt
    pub build_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub build_started_at: Option<OffsetDateTime>,
    pub failure_reason: Option<String>,
}

/// Entry in the append-only payment history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub amount_cents: i64,
    pub plan_type: PlanType,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub method: Option<String>,
}

/// Payment metadata supplied by the caller on upgrade.
/// Treated as opaque: the charged amount always comes from the plan price.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub method: Option<String>,
    pub amount: Option<f64>,
    pub transaction_id: Option<String>,
}

/// Tenant subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub tenant_id: TenantId,
    pub plan_type: PlanType,
    pub features: Features,
    pub pricing: Pricing,
    pub period: Period,
    pub mobile_app: MobileAppBuild,
    pub payment_history: Vec<PaymentRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Default record for a tenant seen for the first time
    pub fn new_default(tenant_id: TenantId, now: OffsetDateTime, policy: &SubscriptionPolicy) -> Self {
        let plan_type = PlanType::Basic;
        Self {
            tenant_id,
            plan_type,
            features: plans::features_for(plan_type),
            pricing: Pricing::for_plan(plan_type),
            period: Period {
                status: PeriodStatus::Active,
                start_date: now,
                end_date: now + time::Duration::days(policy.trial_days),
                auto_renew: true,
                cancelled_at: None,
            },
            mobile_app: MobileAppBuild::default(),
            payment_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_access_mobile_app(&self) -> bool {
        self.features.mobile_app && self.period.status.is_active()
    }

    /// Predicate used by the admin premium listing
    pub fn is_active_premium(&self) -> bool {
        self.plan_type.is_premium() && self.period.status.is_active() && self.features.mobile_app
    }

    /// An app artifact is available for download
    pub fn ready_app(&self) -> Option<&str> {
        if self.mobile_app.has_custom_app {
            self.mobile_app.download_url.as_deref()
        } else {
            None
        }
    }

    /// A build is in flight and has not yet passed its deadline
    pub fn build_in_flight(&self, now: OffsetDateTime, deadline: time::Duration) -> bool {
        if !self.mobile_app.build_status.is_building() {
            return false;
        }
        match self.mobile_app.build_started_at {
            Some(started_at) => started_at >= now - deadline,
            // Legacy rows without a start time can always be replaced
            None => false,
        }
    }

    /// Whether a new build may replace the current state
    pub(crate) fn can_begin_build(&self, stale_before: OffsetDateTime) -> bool {
        match (self.mobile_app.build_status, self.mobile_app.build_started_at) {
            (BuildStatus::Building, Some(started_at)) => started_at < stale_before,
            _ => true,
        }
    }

    /// Move to premium: plan, flags and price change together and one payment is recorded
    pub fn apply_premium_upgrade(&mut self, details: &PaymentDetails, now: OffsetDateTime) -> PaymentRecord {
        self.plan_type = PlanType::Premium;
        self.features.mobile_app = true;
        self.features.priority_support = true;
        self.features.offline_access = true;
        self.pricing.monthly_price_cents = plans::monthly_price_cents(PlanType::Premium);

        let payment = PaymentRecord {
            date: now,
            amount_cents: self.pricing.monthly_price_cents,
            plan_type: PlanType::Premium,
            status: PaymentStatus::Completed,
            transaction_id: details.transaction_id.clone(),
            method: details.method.clone(),
        };
        self.payment_history.push(payment.clone());
        self.updated_at = now;
        payment
    }

    pub fn cancel(&mut self, now: OffsetDateTime) {
        self.period.status = PeriodStatus::Cancelled;
        self.period.cancelled_at = Some(now);
        self.period.auto_renew = false;
        self.updated_at = now;
    }

    pub(crate) fn begin_build(&mut self, build_id: Uuid, now: OffsetDateTime) {
        self.mobile_app.build_status = BuildStatus::Building;
        self.mobile_app.build_id = Some(build_id);
        self.mobile_app.build_started_at = Some(now);
        self.mobile_app.failure_reason = None;
        self.updated_at = now;
    }

    /// Apply a build result if it belongs to the in-flight attempt
    pub(crate) fn finish_build(&mut self, build_id: Uuid, result: &BuildResult, now: OffsetDateTime) -> bool {
        if !self.mobile_app.build_status.is_building() || self.mobile_app.build_id != Some(build_id) {
            return false;
        }
        match result {
            BuildResult::Succeeded { version, download_url } => {
                self.mobile_app.has_custom_app = true;
                self.mobile_app.build_status = BuildStatus::Completed;
                self.mobile_app.generated_at = Some(now);
                self.mobile_app.version = Some(version.clone());
                self.mobile_app.download_url = Some(download_url.clone());
                self.mobile_app.failure_reason = None;
            }
            BuildResult::Failed { reason } => {
                self.mobile_app.build_status = BuildStatus::Failed;
                self.mobile_app.failure_reason = Some(reason.clone());
            }
        }
        self.updated_at = now;
        true
    }
}

/// Outcome reported by the external build job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    Succeeded {
        version: Option<String>,
        download_url: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// Build outcome with policy defaults filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    Succeeded { version: String, download_url: String },
    Failed { reason: String },
}

impl BuildResult {
    pub fn resolve(outcome: BuildOutcome, tenant_id: &TenantId, policy: &SubscriptionPolicy) -> Self {
        match outcome {
            BuildOutcome::Succeeded { version, download_url } => BuildResult::Succeeded {
                version: version
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| policy.default_app_version.clone()),
                download_url: download_url
                    .filter(|u| !u.trim().is_empty())
                    .unwrap_or_else(|| policy.download_url_for(tenant_id)),
            },
            BuildOutcome::Failed { reason } => BuildResult::Failed { reason },
        }
    }
}

/// Result of a mobile app request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileAppRequestOutcome {
    /// A build is already running; nothing was started
    AlreadyBuilding,
    /// The app is available
    Ready {
        download_url: String,
        version: Option<String>,
    },
    /// A new build was queued
    BuildStarted {
        build_id: Uuid,
        estimated_time: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    fn fresh(now: OffsetDateTime) -> Subscription {
        Subscription::new_default(tenant(), now, &SubscriptionPolicy::default())
    }

    #[test]
    fn test_new_default_is_basic_with_trial_period() {
        let now = OffsetDateTime::now_utc();
        let sub = fresh(now);
        assert_eq!(sub.plan_type, PlanType::Basic);
        assert_eq!(sub.pricing.monthly_price_cents, 2_900);
        assert_eq!(sub.pricing.currency, "USD");
        assert_eq!(sub.period.end_date - sub.period.start_date, time::Duration::days(30));
        assert_eq!(sub.mobile_app.build_status, BuildStatus::Pending);
        assert!(!sub.can_access_mobile_app());
    }

    #[test]
    fn test_upgrade_sets_flags_price_and_payment() {
        let now = OffsetDateTime::now_utc();
        let mut sub = fresh(now);
        let details = PaymentDetails {
            method: Some("card".to_string()),
            amount: Some(49.0),
            transaction_id: Some("txn_1".to_string()),
        };
        let payment = sub.apply_premium_upgrade(&details, now);

        assert_eq!(sub.plan_type, PlanType::Premium);
        assert!(sub.features.mobile_app && sub.features.priority_support && sub.features.offline_access);
        assert_eq!(sub.pricing.monthly_price(), 49.0);
        assert_eq!(sub.payment_history.len(), 1);
        assert_eq!(payment.amount_cents, 4_900);
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.transaction_id.as_deref(), Some("txn_1"));
        assert!(sub.can_access_mobile_app());
    }

    #[test]
    fn test_cancel_revokes_mobile_access() {
        let now = OffsetDateTime::now_utc();
        let mut sub = fresh(now);
        sub.apply_premium_upgrade(&PaymentDetails::default(), now);
        sub.cancel(now);
        assert_eq!(sub.period.status, PeriodStatus::Cancelled);
        assert!(!sub.period.auto_renew);
        assert!(!sub.can_access_mobile_app());
        assert!(!sub.is_active_premium());
    }

    #[test]
    fn test_manual_mobile_grant_on_basic_plan_is_not_premium() {
        let now = OffsetDateTime::now_utc();
        let mut sub = fresh(now);
        sub.features.mobile_app = true;
        assert!(sub.can_access_mobile_app());
        assert!(!sub.is_active_premium());
    }

    #[test]
    fn test_build_in_flight_respects_deadline() {
        let now = OffsetDateTime::now_utc();
        let deadline = time::Duration::minutes(90);
        let mut sub = fresh(now);
        sub.begin_build(Uuid::new_v4(), now - time::Duration::minutes(10));
        assert!(sub.build_in_flight(now, deadline));

        sub.mobile_app.build_started_at = Some(now - time::Duration::minutes(91));
        assert!(!sub.build_in_flight(now, deadline));
        assert!(sub.can_begin_build(now - deadline));
    }

    #[test]
    fn test_finish_build_ignores_other_attempts() {
        let now = OffsetDateTime::now_utc();
        let mut sub = fresh(now);
        let current = Uuid::new_v4();
        sub.begin_build(current, now);

        let result = BuildResult::Failed {
            reason: "gradle exited with 1".to_string(),
        };
        assert!(!sub.finish_build(Uuid::new_v4(), &result, now));
        assert_eq!(sub.mobile_app.build_status, BuildStatus::Building);

        assert!(sub.finish_build(current, &result, now));
        assert_eq!(sub.mobile_app.build_status, BuildStatus::Failed);
        assert!(!sub.mobile_app.has_custom_app);
    }

    #[test]
    fn test_resolve_fills_policy_defaults() {
        let policy = SubscriptionPolicy {
            artifact_base_url: "https://cdn.example.com/downloads".to_string(),
            ..SubscriptionPolicy::default()
        };
        let resolved = BuildResult::resolve(
            BuildOutcome::Succeeded {
                version: None,
                download_url: Some(" ".to_string()),
            },
            &tenant(),
            &policy,
        );
        assert_eq!(
            resolved,
            BuildResult::Succeeded {
                version: "1.0.0".to_string(),
                download_url: "https://cdn.example.com/downloads/acme/app.apk".to_string(),
            }
        );
    }
}
