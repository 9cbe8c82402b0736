//! PostgreSQL-backed subscription store

use async_trait::async_trait;
use eduhub_shared::{BuildStatus, PaymentStatus, PeriodStatus, PlanType, TenantId};
use sqlx::PgPool;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::model::{BuildResult, MobileAppBuild, Period, PaymentRecord, Pricing, Subscription};
use crate::plans::Features;
use crate::store::SubscriptionStore;

const SUBSCRIPTION_COLUMNS: &str = r#"
    tenant_id, plan_type,
    feature_web_dashboard, feature_mobile_app, feature_priority_support, feature_offline_access,
    monthly_price_cents, currency,
    period_status, period_start, period_end, auto_renew, cancelled_at,
    has_custom_app, app_generated_at, app_version, app_download_url,
    build_status, build_id, build_started_at, build_failure_reason,
    created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    tenant_id: TenantId,
    plan_type: PlanType,
    feature_web_dashboard: bool,
    feature_mobile_app: bool,
    feature_priority_support: bool,
    feature_offline_access: bool,
    monthly_price_cents: i64,
    currency: String,
    period_status: PeriodStatus,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
    auto_renew: bool,
    cancelled_at: Option<OffsetDateTime>,
    has_custom_app: bool,
    app_generated_at: Option<OffsetDateTime>,
    app_version: Option<String>,
    app_download_url: Option<String>,
    build_status: BuildStatus,
    build_id: Option<Uuid>,
    build_started_at: Option<OffsetDateTime>,
    build_failure_reason: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl SubscriptionRow {
    fn into_subscription(self, payment_history: Vec<PaymentRecord>) -> Subscription {
        Subscription {
            tenant_id: self.tenant_id,
            plan_type: self.plan_type,
            features: Features {
                web_dashboard: self.feature_web_dashboard,
                mobile_app: self.feature_mobile_app,
                priority_support: self.feature_priority_support,
                offline_access: self.feature_offline_access,
            },
            pricing: Pricing {
                monthly_price_cents: self.monthly_price_cents,
                currency: self.currency,
            },
            period: Period {
                status: self.period_status,
                start_date: self.period_start,
                end_date: self.period_end,
                auto_renew: self.auto_renew,
                cancelled_at: self.cancelled_at,
            },
            mobile_app: MobileAppBuild {
                has_custom_app: self.has_custom_app,
                generated_at: self.app_generated_at,
                version: self.app_version,
                download_url: self.app_download_url,
                build_status: self.build_status,
                build_id: self.build_id,
                build_started_at: self.build_started_at,
                failure_reason: self.build_failure_reason,
            },
            payment_history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    tenant_id: TenantId,
    paid_at: OffsetDateTime,
    amount_cents: i64,
    plan_type: PlanType,
    status: PaymentStatus,
    transaction_id: Option<String>,
    method: Option<String>,
}

impl From<PaymentRow> for PaymentRecord {
    fn from(row: PaymentRow) -> Self {
        PaymentRecord {
            date: row.paid_at,
            amount_cents: row.amount_cents,
            plan_type: row.plan_type,
            status: row.status,
            transaction_id: row.transaction_id,
            method: row.method,
        }
    }
}

/// Subscription store backed by the `tenant_subscriptions` and
/// `subscription_payments` tables
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_payments(&self, tenant_ids: &[String]) -> SubscriptionResult<HashMap<TenantId, Vec<PaymentRecord>>> {
        if tenant_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, paid_at, amount_cents, plan_type, status, transaction_id, method
            FROM subscription_payments
            WHERE tenant_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(tenant_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<TenantId, Vec<PaymentRecord>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.tenant_id.clone())
                .or_default()
                .push(row.into());
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<SubscriptionRow>) -> SubscriptionResult<Vec<Subscription>> {
        let ids: Vec<String> = rows.iter().map(|r| r.tenant_id.to_string()).collect();
        let mut payments = self.load_payments(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let history = payments.remove(&row.tenant_id).unwrap_or_default();
                row.into_subscription(history)
            })
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn ping(&self) -> SubscriptionResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find(&self, tenant_id: &TenantId) -> SubscriptionResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM tenant_subscriptions WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(&self, subscription: &Subscription) -> SubscriptionResult<Subscription> {
        sqlx::query(
            r#"
            INSERT INTO tenant_subscriptions (
                tenant_id, plan_type,
                feature_web_dashboard, feature_mobile_app, feature_priority_support, feature_offline_access,
                monthly_price_cents, currency,
                period_status, period_start, period_end, auto_renew,
                build_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(&subscription.tenant_id)
        .bind(subscription.plan_type)
        .bind(subscription.features.web_dashboard)
        .bind(subscription.features.mobile_app)
        .bind(subscription.features.priority_support)
        .bind(subscription.features.offline_access)
        .bind(subscription.pricing.monthly_price_cents)
        .bind(&subscription.pricing.currency)
        .bind(subscription.period.status)
        .bind(subscription.period.start_date)
        .bind(subscription.period.end_date)
        .bind(subscription.period.auto_renew)
        .bind(subscription.mobile_app.build_status)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await?;

        self.find(&subscription.tenant_id)
            .await?
            .ok_or_else(|| SubscriptionError::Storage("subscription vanished after insert".to_string()))
    }

    async fn save_upgrade(
        &self,
        subscription: &Subscription,
        payment: &PaymentRecord,
    ) -> SubscriptionResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE tenant_subscriptions
            SET plan_type = $2,
                feature_web_dashboard = $3,
                feature_mobile_app = $4,
                feature_priority_support = $5,
                feature_offline_access = $6,
                monthly_price_cents = $7,
                currency = $8,
                updated_at = $9
            WHERE tenant_id = $1
            "#,
        )
        .bind(&subscription.tenant_id)
        .bind(subscription.plan_type)
        .bind(subscription.features.web_dashboard)
        .bind(subscription.features.mobile_app)
        .bind(subscription.features.priority_support)
        .bind(subscription.features.offline_access)
        .bind(subscription.pricing.monthly_price_cents)
        .bind(&subscription.pricing.currency)
        .bind(subscription.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SubscriptionError::NotFound(subscription.tenant_id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO subscription_payments
                (tenant_id, paid_at, amount_cents, plan_type, status, transaction_id, method)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&subscription.tenant_id)
        .bind(payment.date)
        .bind(payment.amount_cents)
        .bind(payment.plan_type)
        .bind(payment.status)
        .bind(&payment.transaction_id)
        .bind(&payment.method)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_period(
        &self,
        tenant_id: &TenantId,
        period: &Period,
        now: OffsetDateTime,
    ) -> SubscriptionResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tenant_subscriptions
            SET period_status = $2,
                period_start = $3,
                period_end = $4,
                auto_renew = $5,
                cancelled_at = $6,
                updated_at = $7
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(period.status)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(period.auto_renew)
        .bind(period.cancelled_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SubscriptionError::NotFound(tenant_id.to_string()));
        }
        Ok(())
    }

    async fn try_begin_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> SubscriptionResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_subscriptions
            SET build_status = 'building',
                build_id = $2,
                build_started_at = $3,
                build_failure_reason = NULL,
                updated_at = $3
            WHERE tenant_id = $1
              AND (
                build_status <> 'building'
                OR build_started_at IS NULL
                OR build_started_at < $4
              )
            "#,
        )
        .bind(tenant_id)
        .bind(build_id)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_build(
        &self,
        tenant_id: &TenantId,
        build_id: Uuid,
        result: &BuildResult,
        now: OffsetDateTime,
    ) -> SubscriptionResult<bool> {
        let query = match result {
            BuildResult::Succeeded { version, download_url } => sqlx::query(
                r#"
                UPDATE tenant_subscriptions
                SET has_custom_app = TRUE,
                    build_status = 'completed',
                    app_generated_at = $3,
                    app_version = $4,
                    app_download_url = $5,
                    build_failure_reason = NULL,
                    updated_at = $3
                WHERE tenant_id = $1 AND build_status = 'building' AND build_id = $2
                "#,
            )
            .bind(tenant_id)
            .bind(build_id)
            .bind(now)
            .bind(version)
            .bind(download_url),
            BuildResult::Failed { reason } => sqlx::query(
                r#"
                UPDATE tenant_subscriptions
                SET build_status = 'failed',
                    build_failure_reason = $4,
                    updated_at = $3
                WHERE tenant_id = $1 AND build_status = 'building' AND build_id = $2
                "#,
            )
            .bind(tenant_id)
            .bind(build_id)
            .bind(now)
            .bind(reason),
        };

        let updated = query.execute(&self.pool).await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn list_premium(&self) -> SubscriptionResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM tenant_subscriptions
            WHERE plan_type = 'premium'
              AND period_status = 'active'
              AND feature_mobile_app = TRUE
            ORDER BY tenant_id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn expire_lapsed(&self, now: OffsetDateTime) -> SubscriptionResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_subscriptions
            SET period_status = 'expired', updated_at = $1
            WHERE period_status = 'active' AND period_end < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn fail_stale_builds(
        &self,
        stale_before: OffsetDateTime,
        reason: &str,
        now: OffsetDateTime,
    ) -> SubscriptionResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_subscriptions
            SET build_status = 'failed',
                build_failure_reason = $2,
                updated_at = $3
            WHERE build_status = 'building'
              AND (build_started_at IS NULL OR build_started_at < $1)
            "#,
        )
        .bind(stale_before)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
