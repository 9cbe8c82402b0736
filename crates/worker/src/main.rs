//! eduhub-worker: mobile app builds and subscription maintenance
//!
//! - Polls `mobile_app_build_jobs` and runs the build script
//! - Expires lapsed subscriptions and fails stale builds on a schedule
//! - Cleans up old finished jobs

mod build_processor;
mod config;
mod maintenance;

use std::sync::Arc;

use anyhow::Context;
use eduhub_billing::SubscriptionService;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::EnvFilter;

use build_processor::BuildScript;
use config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = WorkerConfig::from_env().context("Invalid configuration")?;

    let pool = eduhub_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    let service = Arc::new(SubscriptionService::postgres(pool.clone(), config.policy.clone()));

    let mut scheduler = schedule_maintenance(&config, &pool, &service).await?;
    scheduler.start().await.context("Failed to start scheduler")?;

    tracing::info!(
        script = %config.build_script_path.display(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "eduhub-worker started"
    );

    let script = BuildScript::new(config.build_script_path.clone(), config.build_script_timeout);
    let mut ticker = tokio::time::interval(config.poll_interval);

    // Polled for the whole run, including while builds are running
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let interrupted = build_processor::drain_queue(
                    &pool,
                    &service,
                    &script,
                    config.build_batch_size,
                    &mut shutdown,
                )
                .await;
                if interrupted {
                    break;
                }
            }
        }
    }

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler did not shut down cleanly");
    }
    tracing::info!("eduhub-worker stopped");
    Ok(())
}

async fn schedule_maintenance(
    config: &WorkerConfig,
    pool: &PgPool,
    service: &Arc<SubscriptionService>,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await.context("Failed to create scheduler")?;

    let expiry_service = service.clone();
    scheduler
        .add(
            Job::new_async(config.expiry_sweep_cron.as_str(), move |_id, _scheduler| {
                let service = expiry_service.clone();
                Box::pin(async move {
                    maintenance::run_expiry_sweep(&service).await;
                })
            })
            .context("Invalid EXPIRY_SWEEP_CRON")?,
        )
        .await
        .context("Failed to schedule expiry sweep")?;

    let stale_pool = pool.clone();
    let stale_service = service.clone();
    scheduler
        .add(
            Job::new_async(config.stale_build_sweep_cron.as_str(), move |_id, _scheduler| {
                let pool = stale_pool.clone();
                let service = stale_service.clone();
                Box::pin(async move {
                    maintenance::run_stale_build_sweep(&pool, &service, OffsetDateTime::now_utc())
                        .await;
                })
            })
            .context("Invalid STALE_BUILD_SWEEP_CRON")?,
        )
        .await
        .context("Failed to schedule stale build sweep")?;

    let cleanup_pool = pool.clone();
    let retention_days = config.job_retention_days;
    scheduler
        .add(
            Job::new_async(config.job_cleanup_cron.as_str(), move |_id, _scheduler| {
                let pool = cleanup_pool.clone();
                Box::pin(async move {
                    maintenance::cleanup_old_jobs(&pool, retention_days).await;
                })
            })
            .context("Invalid JOB_CLEANUP_CRON")?,
        )
        .await
        .context("Failed to schedule job cleanup")?;

    Ok(scheduler)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("eduhub_worker=info,eduhub_billing=info")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
