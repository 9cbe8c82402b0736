//! Tenant subscription routes
//!
//! Tenant users may only address their own tenant; admins may address any.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    Json,
};
use eduhub_billing::{
    BuildOutcome, Features, MobileAppRequestOutcome, PaymentDetails, Pricing, Subscription,
};
use eduhub_shared::{BuildStatus, PeriodStatus, PlanType, TenantId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    #[serde(default)]
    pub payment_details: PaymentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResultRequest {
    pub build_id: Uuid,
    pub success: bool,
    pub version: Option<String>,
    pub download_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingView {
    pub monthly_price: f64,
    pub currency: String,
}

impl From<&Pricing> for PricingView {
    fn from(pricing: &Pricing) -> Self {
        Self {
            monthly_price: pricing.monthly_price(),
            currency: pricing.currency.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub tenant_id: String,
    pub plan_type: PlanType,
    pub features: Features,
    pub pricing: PricingView,
    pub status: PeriodStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub has_custom_app: bool,
    pub can_access_mobile_app: bool,
}

impl From<&Subscription> for SubscriptionView {
    fn from(sub: &Subscription) -> Self {
        Self {
            tenant_id: sub.tenant_id.to_string(),
            plan_type: sub.plan_type,
            features: sub.features,
            pricing: PricingView::from(&sub.pricing),
            status: sub.period.status,
            end_date: sub.period.end_date,
            has_custom_app: sub.mobile_app.has_custom_app,
            can_access_mobile_app: sub.can_access_mobile_app(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub success: bool,
    pub subscription: SubscriptionView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradedPlanView {
    pub plan_type: PlanType,
    pub features: Features,
    pub pricing: PricingView,
    pub can_access_mobile_app: bool,
}

#[derive(Debug, Serialize)]
pub struct UpgradeResponse {
    pub success: bool,
    pub message: String,
    pub subscription: UpgradedPlanView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileAppResponse {
    pub success: bool,
    pub message: String,
    pub status: BuildStatusView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<Uuid>,
}

/// Caller-facing state of the tenant's app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatusView {
    Building,
    Ready,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumTenantView {
    pub tenant_id: String,
    pub plan_type: PlanType,
    pub status: PeriodStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub monthly_revenue: f64,
    pub has_custom_app: bool,
    pub last_build_status: BuildStatus,
}

#[derive(Debug, Serialize)]
pub struct PremiumListResponse {
    pub success: bool,
    pub count: usize,
    pub subscriptions: Vec<PremiumTenantView>,
}

fn parse_tenant(raw: &str) -> ApiResult<TenantId> {
    TenantId::parse(raw).map_err(|e| ApiError::Validation(e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /subscriptions/:tenant_id
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let tenant_id = parse_tenant(&tenant_id)?;
    auth_user.ensure_tenant_access(&tenant_id)?;

    let subscription = state.subscriptions.get_or_create(&tenant_id).await?;

    Ok(Json(SubscriptionResponse {
        success: true,
        subscription: SubscriptionView::from(&subscription),
    }))
}

/// POST /subscriptions/:tenant_id/upgrade
pub async fn upgrade(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(tenant_id): Path<String>,
    payload: Result<Json<UpgradeRequest>, JsonRejection>,
) -> ApiResult<Json<UpgradeResponse>> {
    let tenant_id = parse_tenant(&tenant_id)?;
    auth_user.ensure_tenant_access(&tenant_id)?;
    let Json(request) = payload?;

    let subscription = state
        .subscriptions
        .upgrade_to_premium(&tenant_id, &request.payment_details)
        .await?;

    Ok(Json(UpgradeResponse {
        success: true,
        message: "Successfully upgraded to Premium Plan!".to_string(),
        subscription: UpgradedPlanView {
            plan_type: subscription.plan_type,
            features: subscription.features,
            pricing: PricingView::from(&subscription.pricing),
            can_access_mobile_app: subscription.can_access_mobile_app(),
        },
    }))
}

/// POST /subscriptions/:tenant_id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let tenant_id = parse_tenant(&tenant_id)?;
    auth_user.ensure_tenant_access(&tenant_id)?;

    state.subscriptions.cancel(&tenant_id).await?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Subscription cancelled".to_string(),
    }))
}

/// POST /subscriptions/:tenant_id/mobile-app
pub async fn request_mobile_app(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<MobileAppResponse>> {
    let tenant_id = parse_tenant(&tenant_id)?;
    auth_user.ensure_tenant_access(&tenant_id)?;

    let response = match state.subscriptions.request_mobile_app(&tenant_id).await? {
        MobileAppRequestOutcome::AlreadyBuilding => MobileAppResponse {
            success: true,
            message: format!(
                "Mobile app is currently being built. Please check back in {}.",
                eduhub_billing::ESTIMATED_BUILD_TIME
            ),
            status: BuildStatusView::Building,
            download_url: None,
            version: None,
            estimated_time: None,
            build_id: None,
        },
        MobileAppRequestOutcome::Ready {
            download_url,
            version,
        } => MobileAppResponse {
            success: true,
            message: "Mobile app is ready for download!".to_string(),
            status: BuildStatusView::Ready,
            download_url: Some(download_url),
            version,
            estimated_time: None,
            build_id: None,
        },
        MobileAppRequestOutcome::BuildStarted {
            build_id,
            estimated_time,
        } => MobileAppResponse {
            success: true,
            message: format!(
                "Mobile app generation started! This will take {estimated_time}. We will notify you when ready."
            ),
            status: BuildStatusView::Building,
            download_url: None,
            version: None,
            estimated_time: Some(estimated_time.to_string()),
            build_id: Some(build_id),
        },
    };

    Ok(Json(response))
}

/// GET /subscriptions/admin/premium
pub async fn list_premium(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<PremiumListResponse>> {
    auth_user.ensure_admin()?;

    let subscriptions: Vec<PremiumTenantView> = state
        .subscriptions
        .list_premium_tenants()
        .await?
        .iter()
        .map(|sub| PremiumTenantView {
            tenant_id: sub.tenant_id.to_string(),
            plan_type: sub.plan_type,
            status: sub.period.status,
            end_date: sub.period.end_date,
            monthly_revenue: sub.pricing.monthly_price(),
            has_custom_app: sub.mobile_app.has_custom_app,
            last_build_status: sub.mobile_app.build_status,
        })
        .collect();

    Ok(Json(PremiumListResponse {
        success: true,
        count: subscriptions.len(),
        subscriptions,
    }))
}

/// POST /subscriptions/:tenant_id/mobile-app/build-result
///
/// Called by the build pipeline with the shared build token.
pub async fn report_build_result(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    payload: Result<Json<BuildResultRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let Json(request) = payload?;

    let outcome = if request.success {
        BuildOutcome::Succeeded {
            version: request.version,
            download_url: request.download_url,
        }
    } else {
        BuildOutcome::Failed {
            reason: request
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "build failed".to_string()),
        }
    };

    let applied = state
        .subscriptions
        .complete_build(&tenant_id, request.build_id, outcome)
        .await?;

    let message = match applied {
        Some(_) => "Build result recorded",
        None => "Build result ignored: build is no longer in flight",
    };

    Ok(Json(MessageResponse {
        success: true,
        message: message.to_string(),
    }))
}
