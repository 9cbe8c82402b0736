//! Scheduled maintenance jobs
//!
//! Subscription sweeps go through `SubscriptionService`; queue housekeeping
//! works on `mobile_app_build_jobs` directly.

use eduhub_billing::SubscriptionService;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Move active subscriptions past their end date to `expired`
pub async fn run_expiry_sweep(service: &SubscriptionService) {
    if let Err(e) = service.expire_lapsed(OffsetDateTime::now_utc()).await {
        error!(error = %e, "Subscription expiry sweep failed");
    }
}

/// Fail builds past the deadline and abandon the jobs that owned them
pub async fn run_stale_build_sweep(
    pool: &PgPool,
    service: &SubscriptionService,
    now: OffsetDateTime,
) {
    if let Err(e) = service.fail_stale_builds(now).await {
        error!(error = %e, "Stale build sweep failed");
    }
    abandon_stale_jobs(pool, now - service.policy().build_deadline).await;
    abandon_superseded_jobs(pool).await;
}

/// Pending jobs whose build id is no longer the tenant's in-flight build
/// would only produce a result that gets ignored
async fn abandon_superseded_jobs(pool: &PgPool) {
    let result = sqlx::query(
        r#"
        UPDATE mobile_app_build_jobs j
        SET status = 'abandoned', finished_at = NOW(), last_error = 'build is no longer in flight'
        WHERE j.status = 'pending'
          AND NOT EXISTS (
              SELECT 1 FROM tenant_subscriptions s
              WHERE s.tenant_id = j.tenant_id
                AND s.build_status = 'building'
                AND s.build_id = j.id
          )
        "#,
    )
    .execute(pool)
    .await;

    match result {
        Ok(rows) if rows.rows_affected() > 0 => {
            info!(abandoned = rows.rows_affected(), "Abandoned superseded build jobs");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to abandon superseded build jobs"),
    }
}

/// Jobs stuck in `processing` belonged to a worker that died mid-build
async fn abandon_stale_jobs(pool: &PgPool, started_before: OffsetDateTime) {
    let result = sqlx::query(
        r#"
        UPDATE mobile_app_build_jobs
        SET status = 'abandoned', finished_at = NOW(), last_error = 'worker did not finish the build'
        WHERE status = 'processing' AND started_at < $1
        "#,
    )
    .bind(started_before)
    .execute(pool)
    .await;

    match result {
        Ok(rows) if rows.rows_affected() > 0 => {
            warn!(abandoned = rows.rows_affected(), "Abandoned stale build jobs");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to abandon stale build jobs"),
    }
}

/// Delete finished jobs older than the retention window
pub async fn cleanup_old_jobs(pool: &PgPool, retention_days: i32) {
    let result = sqlx::query(
        r#"
        DELETE FROM mobile_app_build_jobs
        WHERE finished_at < NOW() - make_interval(days => $1)
          AND status IN ('completed', 'failed', 'abandoned')
        "#,
    )
    .bind(retention_days)
    .execute(pool)
    .await;

    match result {
        Ok(rows) => {
            if rows.rows_affected() > 0 {
                info!(
                    deleted = rows.rows_affected(),
                    retention_days = retention_days,
                    "Cleaned up old build jobs"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to clean up old build jobs");
        }
    }
}
