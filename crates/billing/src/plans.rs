//! Plan Policy
//!
//! Prices, feature sets and mobile-app build policy for each plan.
//! `features_for()` is the only place that decides what a plan grants; stored
//! feature flags start from it and may later be overridden per tenant.

use eduhub_shared::{PlanType, TenantId};
use serde::{Deserialize, Serialize};

/// Monthly price of the basic plan in cents
pub const BASIC_MONTHLY_PRICE_CENTS: i64 = 2_900;

/// Monthly price of the premium plan in cents
pub const PREMIUM_MONTHLY_PRICE_CENTS: i64 = 4_900;

pub const DEFAULT_CURRENCY: &str = "USD";

/// Shown to callers when a new build is queued
pub const ESTIMATED_BUILD_TIME: &str = "30-45 minutes";

pub const DEFAULT_TRIAL_DAYS: i64 = 30;
pub const DEFAULT_APP_VERSION: &str = "1.0.0";
pub const DEFAULT_BUILD_DEADLINE_MINUTES: i64 = 90;
pub const DEFAULT_ARTIFACT_BASE_URL: &str = "http://localhost:3000/downloads";

/// Capability flags stored on each subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub web_dashboard: bool,
    pub mobile_app: bool,
    pub priority_support: bool,
    pub offline_access: bool,
}

/// Get the feature set a plan grants
pub fn features_for(plan: PlanType) -> Features {
    match plan {
        PlanType::Basic => Features {
            web_dashboard: true,
            mobile_app: false,
            priority_support: false,
            offline_access: false,
        },
        PlanType::Premium => Features {
            web_dashboard: true,
            mobile_app: true,
            priority_support: true,
            offline_access: true,
        },
    }
}

/// Get the monthly price of a plan in cents
pub fn monthly_price_cents(plan: PlanType) -> i64 {
    match plan {
        PlanType::Basic => BASIC_MONTHLY_PRICE_CENTS,
        PlanType::Premium => PREMIUM_MONTHLY_PRICE_CENTS,
    }
}

/// Runtime policy for subscription creation and app builds
#[derive(Debug, Clone)]
pub struct SubscriptionPolicy {
    /// Length of the initial period for lazily created subscriptions
    pub trial_days: i64,
    /// How long a build may stay in `building` before a new request may replace it
    pub build_deadline: time::Duration,
    /// Base URL under which build artifacts are published
    pub artifact_base_url: String,
    /// Version recorded when the build does not report one
    pub default_app_version: String,
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            trial_days: DEFAULT_TRIAL_DAYS,
            build_deadline: time::Duration::minutes(DEFAULT_BUILD_DEADLINE_MINUTES),
            artifact_base_url: DEFAULT_ARTIFACT_BASE_URL.to_string(),
            default_app_version: DEFAULT_APP_VERSION.to_string(),
        }
    }
}

impl SubscriptionPolicy {
    /// Load policy from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            trial_days: lookup("SUBSCRIPTION_TRIAL_DAYS")
                .and_then(|v| v.parse().ok())
                .filter(|days: &i64| *days > 0)
                .unwrap_or(defaults.trial_days),
            build_deadline: lookup("MOBILE_APP_BUILD_TIMEOUT_MINUTES")
                .and_then(|v| v.parse().ok())
                .filter(|minutes: &i64| *minutes > 0)
                .map(time::Duration::minutes)
                .unwrap_or(defaults.build_deadline),
            artifact_base_url: lookup("MOBILE_APP_ARTIFACT_BASE_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.artifact_base_url),
            default_app_version: lookup("MOBILE_APP_DEFAULT_VERSION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.default_app_version),
        }
    }

    /// Download location of a tenant's app when the build does not report one
    pub fn download_url_for(&self, tenant_id: &TenantId) -> String {
        format!(
            "{}/{}/app.apk",
            self.artifact_base_url.trim_end_matches('/'),
            tenant_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_plan_features() {
        let features = features_for(PlanType::Basic);
        assert!(features.web_dashboard);
        assert!(!features.mobile_app);
        assert!(!features.priority_support);
        assert!(!features.offline_access);
    }

    #[test]
    fn test_premium_plan_features() {
        let features = features_for(PlanType::Premium);
        assert!(features.mobile_app);
        assert!(features.priority_support);
        assert!(features.offline_access);
    }

    #[test]
    fn test_plan_prices() {
        assert_eq!(monthly_price_cents(PlanType::Basic), 2_900);
        assert_eq!(monthly_price_cents(PlanType::Premium), 4_900);
    }

    #[test]
    fn test_download_url_strips_trailing_slash() {
        let policy = SubscriptionPolicy {
            artifact_base_url: "https://cdn.example.com/downloads/".to_string(),
            ..SubscriptionPolicy::default()
        };
        let tenant = TenantId::parse("acme").unwrap();
        assert_eq!(
            policy.download_url_for(&tenant),
            "https://cdn.example.com/downloads/acme/app.apk"
        );
    }

    #[test]
    fn test_policy_lookup_overrides_and_ignores_invalid_values() {
        use std::collections::HashMap;

        let vars: HashMap<&str, &str> = [
            ("SUBSCRIPTION_TRIAL_DAYS", "14"),
            ("MOBILE_APP_BUILD_TIMEOUT_MINUTES", "not-a-number"),
            ("MOBILE_APP_ARTIFACT_BASE_URL", "https://cdn.example.com/apk"),
        ]
        .into_iter()
        .collect();
        let policy = SubscriptionPolicy::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(policy.trial_days, 14);
        assert_eq!(policy.build_deadline, time::Duration::minutes(90));
        assert_eq!(policy.artifact_base_url, "https://cdn.example.com/apk");
        assert_eq!(policy.default_app_version, "1.0.0");
    }

    #[test]
    fn test_features_serialize_camel_case() {
        let json = serde_json::to_value(features_for(PlanType::Premium)).unwrap();
        assert_eq!(json["webDashboard"], true);
        assert_eq!(json["prioritySupport"], true);
    }
}
