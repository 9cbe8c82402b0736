//! Subscription lifecycle tests against the in-memory store and queue
//!
//! ## Test Coverage
//! - Lazy creation of the default basic subscription
//! - Premium upgrade feature set and payment history
//! - Mobile app entitlement gate
//! - Single build per tenant under rapid and concurrent requests
//! - Build completion (success and failure) and retry
//! - Admin premium listing predicate

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use eduhub_billing::{
    BuildOutcome, InMemoryBuildQueue, InMemorySubscriptionStore, MobileAppRequestOutcome,
    PaymentDetails, SubscriptionError, SubscriptionPolicy, SubscriptionService, SubscriptionStore,
};
use eduhub_shared::{BuildStatus, PaymentStatus, PeriodStatus, PlanType, TenantId};
use time::OffsetDateTime;

// ============================================================================
// Test Utilities
// ============================================================================

struct TestContext {
    service: Arc<SubscriptionService>,
    store: Arc<InMemorySubscriptionStore>,
    queue: Arc<InMemoryBuildQueue>,
}

fn setup() -> TestContext {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let queue = Arc::new(InMemoryBuildQueue::new());
    let policy = SubscriptionPolicy {
        artifact_base_url: "https://downloads.example.com/apps".to_string(),
        ..SubscriptionPolicy::default()
    };
    let service = Arc::new(SubscriptionService::new(store.clone(), queue.clone(), policy));
    TestContext { service, store, queue }
}

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).expect("valid tenant id")
}

fn card_payment() -> PaymentDetails {
    PaymentDetails {
        method: Some("card".to_string()),
        amount: Some(49.0),
        transaction_id: None,
    }
}

async fn create_premium(ctx: &TestContext, id: &str) -> TenantId {
    let tenant_id = tenant(id);
    ctx.service.get_or_create(&tenant_id).await.unwrap();
    ctx.service
        .upgrade_to_premium(&tenant_id, &card_payment())
        .await
        .unwrap();
    tenant_id
}

fn build_id_of(outcome: &MobileAppRequestOutcome) -> uuid::Uuid {
    match outcome {
        MobileAppRequestOutcome::BuildStarted { build_id, .. } => *build_id,
        other => panic!("expected BuildStarted, got {:?}", other),
    }
}

// ============================================================================
// Creation and upgrade
// ============================================================================

#[tokio::test]
async fn test_unknown_tenant_gets_basic_subscription() {
    let ctx = setup();
    let now = OffsetDateTime::now_utc();

    let sub = ctx.service.get_or_create(&tenant("newcomer")).await.unwrap();

    assert_eq!(sub.plan_type, PlanType::Basic);
    assert_eq!(sub.period.status, PeriodStatus::Active);
    assert!(!sub.can_access_mobile_app());
    assert!(!sub.features.mobile_app);
    let drift = sub.period.end_date - (now + time::Duration::days(30));
    assert!(drift.abs() < time::Duration::seconds(5), "end date drift {drift}");
}

#[tokio::test]
async fn test_upgrade_sets_premium_features_and_records_one_payment() {
    let ctx = setup();
    let tenant_id = tenant("acme");
    let before = ctx.service.get_or_create(&tenant_id).await.unwrap();

    let upgraded = ctx
        .service
        .upgrade_to_premium(&tenant_id, &card_payment())
        .await
        .unwrap();

    assert_eq!(upgraded.plan_type, PlanType::Premium);
    assert!(upgraded.features.mobile_app);
    assert!(upgraded.features.priority_support);
    assert!(upgraded.features.offline_access);
    assert_eq!(upgraded.pricing.monthly_price_cents, 4_900);
    assert_eq!(
        upgraded.payment_history.len(),
        before.payment_history.len() + 1
    );
    let payment = upgraded.payment_history.last().unwrap();
    assert_eq!(payment.amount_cents, 4_900);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.method.as_deref(), Some("card"));

    let stored = ctx.store.find(&tenant_id).await.unwrap().unwrap();
    assert_eq!(stored, upgraded);
}

// ============================================================================
// Entitlement gate
// ============================================================================

#[tokio::test]
async fn test_basic_plan_cannot_request_mobile_app() {
    let ctx = setup();
    let tenant_id = tenant("basic-only");
    ctx.service.get_or_create(&tenant_id).await.unwrap();

    for _ in 0..3 {
        let err = ctx.service.request_mobile_app(&tenant_id).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::Forbidden));
    }
    assert_eq!(ctx.queue.publish_count(), 0);
}

#[tokio::test]
async fn test_premium_active_tenant_is_never_forbidden() {
    let ctx = setup();
    let tenant_id = create_premium(&ctx, "acme").await;

    for _ in 0..3 {
        assert!(ctx.service.request_mobile_app(&tenant_id).await.is_ok());
    }
}

// ============================================================================
// Build serialization
// ============================================================================

#[tokio::test]
async fn test_rapid_requests_start_one_build() {
    let ctx = setup();
    let tenant_id = create_premium(&ctx, "acme").await;

    let first = ctx.service.request_mobile_app(&tenant_id).await.unwrap();
    let second = ctx.service.request_mobile_app(&tenant_id).await.unwrap();

    assert!(matches!(
        first,
        MobileAppRequestOutcome::BuildStarted {
            estimated_time: "30-45 minutes",
            ..
        }
    ));
    assert_eq!(second, MobileAppRequestOutcome::AlreadyBuilding);
    assert_eq!(ctx.queue.publish_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_start_one_build() {
    let ctx = setup();
    let tenant_id = create_premium(&ctx, "acme").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = ctx.service.clone();
        let tenant_id = tenant_id.clone();
        handles.push(tokio::spawn(async move {
            service.request_mobile_app(&tenant_id).await
        }));
    }

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            MobileAppRequestOutcome::BuildStarted { .. } => started += 1,
            MobileAppRequestOutcome::AlreadyBuilding => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(ctx.queue.publish_count(), 1);
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_successful_build_serves_ready_app_without_rebuilding() {
    let ctx = setup();
    let tenant_id = create_premium(&ctx, "acme").await;
    let started = ctx.service.request_mobile_app(&tenant_id).await.unwrap();
    let build_id = build_id_of(&started);

    let completed = ctx
        .service
        .complete_build(
            &tenant_id,
            build_id,
            BuildOutcome::Succeeded {
                version: None,
                download_url: None,
            },
        )
        .await
        .unwrap()
        .expect("result should apply to the in-flight build");
    assert_eq!(completed.mobile_app.build_status, BuildStatus::Completed);
    assert!(completed.mobile_app.has_custom_app);
    assert!(completed.mobile_app.generated_at.is_some());

    let again = ctx.service.request_mobile_app(&tenant_id).await.unwrap();
    assert_eq!(
        again,
        MobileAppRequestOutcome::Ready {
            download_url: "https://downloads.example.com/apps/acme/app.apk".to_string(),
            version: Some("1.0.0".to_string()),
        }
    );
    assert_eq!(ctx.queue.publish_count(), 1);
}

#[tokio::test]
async fn test_failed_build_is_retried_on_next_request() {
    let ctx = setup();
    let tenant_id = create_premium(&ctx, "acme").await;
    let build_id = build_id_of(&ctx.service.request_mobile_app(&tenant_id).await.unwrap());

    let failed = ctx
        .service
        .complete_build(
            &tenant_id,
            build_id,
            BuildOutcome::Failed {
                reason: "signing key missing".to_string(),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.mobile_app.build_status, BuildStatus::Failed);
    assert!(!failed.mobile_app.has_custom_app);

    let retry = ctx.service.request_mobile_app(&tenant_id).await.unwrap();
    let retry_id = build_id_of(&retry);
    assert_ne!(retry_id, build_id);
    assert_eq!(ctx.queue.publish_count(), 2);

    let published = ctx.queue.published();
    assert_eq!(published[1].build_id, retry_id);
    assert_eq!(published[1].tenant_id, tenant_id);
}

#[tokio::test]
async fn test_duplicate_completion_report_is_ignored() {
    let ctx = setup();
    let tenant_id = create_premium(&ctx, "acme").await;
    let build_id = build_id_of(&ctx.service.request_mobile_app(&tenant_id).await.unwrap());
    let success = BuildOutcome::Succeeded {
        version: Some("2.3.0".to_string()),
        download_url: Some("https://cdn.example.com/acme.apk".to_string()),
    };

    assert!(ctx
        .service
        .complete_build(&tenant_id, build_id, success.clone())
        .await
        .unwrap()
        .is_some());
    assert!(ctx
        .service
        .complete_build(&tenant_id, build_id, BuildOutcome::Failed { reason: "late".to_string() })
        .await
        .unwrap()
        .is_none());

    let stored = ctx.store.find(&tenant_id).await.unwrap().unwrap();
    assert_eq!(stored.mobile_app.build_status, BuildStatus::Completed);
    assert_eq!(stored.mobile_app.version.as_deref(), Some("2.3.0"));
    assert_eq!(
        stored.mobile_app.download_url.as_deref(),
        Some("https://cdn.example.com/acme.apk")
    );
}

// ============================================================================
// Admin listing
// ============================================================================

#[tokio::test]
async fn test_premium_listing_excludes_cancelled_and_basic() {
    let ctx = setup();
    let active = create_premium(&ctx, "active-premium").await;
    let cancelled = create_premium(&ctx, "cancelled-premium").await;
    ctx.service.cancel(&cancelled).await.unwrap();
    ctx.service.get_or_create(&tenant("basic")).await.unwrap();

    // Manual grant on a basic plan is not a premium tenant
    let mut granted = ctx.service.get_or_create(&tenant("granted")).await.unwrap();
    granted.features.mobile_app = true;
    ctx.store.put(granted).unwrap();

    let listed = ctx.service.list_premium_tenants().await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|s| s.tenant_id.as_str()).collect();
    assert_eq!(ids, vec![active.as_str()]);
    assert!(listed.iter().all(|s| s.plan_type == PlanType::Premium
        && s.period.status == PeriodStatus::Active
        && s.features.mobile_app));
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_acme_end_to_end() {
    let ctx = setup();
    let acme = tenant("acme");

    let sub = ctx.service.get_or_create(&acme).await.unwrap();
    assert_eq!(sub.plan_type, PlanType::Basic);
    assert!(!sub.can_access_mobile_app());

    let upgraded = ctx.service.upgrade_to_premium(&acme, &card_payment()).await.unwrap();
    assert_eq!(upgraded.plan_type, PlanType::Premium);

    let requested = ctx.service.request_mobile_app(&acme).await.unwrap();
    let request = ctx.queue.published().pop().unwrap();
    assert_eq!(build_id_of(&requested), request.build_id);

    ctx.service
        .complete_build(
            &acme,
            request.build_id,
            BuildOutcome::Succeeded {
                version: None,
                download_url: None,
            },
        )
        .await
        .unwrap();

    match ctx.service.request_mobile_app(&acme).await.unwrap() {
        MobileAppRequestOutcome::Ready { download_url, version } => {
            assert!(download_url.ends_with("/acme/app.apk"));
            assert_eq!(version.as_deref(), Some("1.0.0"));
        }
        other => panic!("expected ready app, got {:?}", other),
    }
}
