//! Build Queue Processor
//!
//! Claims pending jobs from `mobile_app_build_jobs`, runs the build script for
//! each, and records the outcome on the tenant's subscription. A job is
//! claimed by exactly one worker (`FOR UPDATE SKIP LOCKED`) and only runs
//! while it is still the tenant's in-flight build.

use eduhub_billing::{BuildOutcome, SubscriptionError, SubscriptionService};
use eduhub_shared::TenantId;
use sqlx::PgPool;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_REASON_CHARS: usize = 500;

/// A job this worker now owns
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub tenant_id: TenantId,
}

/// Values the build script reports on stdout as `key=value` lines
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScriptReport {
    pub version: Option<String>,
    pub download_url: Option<String>,
}

/// External build script invocation: `<path> <tenant_id>` with `BUILD_ID` set
#[derive(Debug, Clone)]
pub struct BuildScript {
    path: PathBuf,
    timeout: Duration,
}

impl BuildScript {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Run the script for a job. Never errors: every failure becomes a failed outcome.
    pub async fn run(&self, job: &ClaimedJob) -> BuildOutcome {
        let mut command = Command::new(&self.path);
        command
            .arg(job.tenant_id.as_str())
            .env("BUILD_ID", job.id.to_string())
            .env("TENANT_ID", job.tenant_id.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return BuildOutcome::Failed {
                    reason: format!(
                        "build script timed out after {}s",
                        self.timeout.as_secs()
                    ),
                }
            }
            Ok(Err(e)) => {
                return BuildOutcome::Failed {
                    reason: format!("failed to start build script: {e}"),
                }
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            let report = parse_script_output(&String::from_utf8_lossy(&output.stdout));
            BuildOutcome::Succeeded {
                version: report.version,
                download_url: report.download_url,
            }
        } else {
            BuildOutcome::Failed {
                reason: failure_reason(output.status, &String::from_utf8_lossy(&output.stderr)),
            }
        }
    }
}

/// Parse `version=` and `download_url=` lines; later lines win
pub fn parse_script_output(stdout: &str) -> ScriptReport {
    let mut report = ScriptReport::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "version" => report.version = Some(value.to_string()),
            "download_url" => report.download_url = Some(value.to_string()),
            _ => {}
        }
    }
    report
}

fn failure_reason(status: ExitStatus, stderr: &str) -> String {
    let last_line = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last();

    match last_line {
        Some(line) => {
            let line: String = line.chars().take(MAX_REASON_CHARS).collect();
            format!("build script failed ({status}): {line}")
        }
        None => format!("build script failed ({status})"),
    }
}

/// Claim up to `limit` pending jobs, oldest first
pub async fn claim_pending_jobs(pool: &PgPool, limit: i64) -> Result<Vec<ClaimedJob>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE mobile_app_build_jobs
        SET status = 'processing', started_at = NOW()
        WHERE id IN (
            SELECT id FROM mobile_app_build_jobs
            WHERE status = 'pending'
            ORDER BY requested_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, tenant_id
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Run claimed jobs until the queue is empty or `shutdown` resolves.
///
/// Jobs in a claimed batch run concurrently. Returns `true` when shutdown
/// interrupted the drain; the interrupted jobs are put back to `pending`.
pub async fn drain_queue<S>(
    pool: &PgPool,
    service: &Arc<SubscriptionService>,
    script: &BuildScript,
    batch_size: i64,
    shutdown: &mut S,
) -> bool
where
    S: Future<Output = ()> + Unpin,
{
    loop {
        let jobs = match claim_pending_jobs(pool, batch_size).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim build jobs");
                return false;
            }
        };

        if jobs.is_empty() {
            return false;
        }

        info!(count = jobs.len(), "Processing mobile app build jobs");
        let job_ids: Vec<Uuid> = jobs.iter().map(|job| job.id).collect();

        let mut running = JoinSet::new();
        for job in jobs {
            running.spawn(process_job(
                pool.clone(),
                service.clone(),
                script.clone(),
                job,
            ));
        }

        let interrupted = tokio::select! {
            _ = wait_for_all(&mut running) => false,
            _ = &mut *shutdown => true,
        };

        if interrupted {
            warn!(count = job_ids.len(), "Shutdown during builds, releasing claimed jobs");
            // Aborting drops the script futures, which kills the children
            running.abort_all();
            wait_for_all(&mut running).await;
            release_jobs(pool, &job_ids).await;
            return true;
        }
    }
}

async fn wait_for_all(running: &mut JoinSet<()>) {
    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!(error = %e, "Build job task panicked");
            }
        }
    }
}

async fn process_job(
    pool: PgPool,
    service: Arc<SubscriptionService>,
    script: BuildScript,
    job: ClaimedJob,
) {
    match service.is_current_build(&job.tenant_id, job.id).await {
        Ok(true) => {}
        Ok(false) => {
            info!(
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                "Skipping build that is no longer in flight"
            );
            mark_job(&pool, job.id, "abandoned", Some("build is no longer in flight")).await;
            return;
        }
        Err(e) => {
            error!(job_id = %job.id, tenant_id = %job.tenant_id, error = %e, "Failed to check build state");
            release_jobs(&pool, &[job.id]).await;
            return;
        }
    }

    info!(job_id = %job.id, tenant_id = %job.tenant_id, "Starting mobile app build");

    let outcome = script.run(&job).await;
    let failure = match &outcome {
        BuildOutcome::Succeeded { .. } => None,
        BuildOutcome::Failed { reason } => Some(reason.clone()),
    };

    match report_outcome(&service, &job, outcome).await {
        Ok(true) => {}
        Ok(false) => warn!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            "Build finished after it was superseded or timed out"
        ),
        Err(e) => {
            error!(job_id = %job.id, tenant_id = %job.tenant_id, error = %e, "Failed to record build result");
            mark_job(&pool, job.id, "failed", Some(&format!("result not recorded: {e}"))).await;
            return;
        }
    }

    match failure {
        None => mark_job(&pool, job.id, "completed", None).await,
        Some(reason) => mark_job(&pool, job.id, "failed", Some(&reason)).await,
    }
}

/// Record the outcome, retrying transient storage errors.
/// Returns whether the result applied to the in-flight build.
async fn report_outcome(
    service: &SubscriptionService,
    job: &ClaimedJob,
    outcome: BuildOutcome,
) -> Result<bool, SubscriptionError> {
    let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);

    RetryIf::spawn(
        strategy,
        || {
            let outcome = outcome.clone();
            async move {
                service
                    .complete_build(&job.tenant_id, job.id, outcome)
                    .await
                    .map(|applied| applied.is_some())
            }
        },
        |e: &SubscriptionError| matches!(e, SubscriptionError::Storage(_)),
    )
    .await
}

/// Hand claimed jobs that did not finish back to the queue
async fn release_jobs(pool: &PgPool, job_ids: &[Uuid]) {
    if let Err(e) = sqlx::query(
        r#"
        UPDATE mobile_app_build_jobs
        SET status = 'pending', started_at = NULL
        WHERE id = ANY($1) AND status = 'processing'
        "#,
    )
    .bind(job_ids)
    .execute(pool)
    .await
    {
        error!(error = %e, "Failed to release build jobs");
    }
}

async fn mark_job(pool: &PgPool, job_id: Uuid, status: &str, last_error: Option<&str>) {
    if let Err(e) = sqlx::query(
        "UPDATE mobile_app_build_jobs SET status = $2, finished_at = NOW(), last_error = $3 WHERE id = $1",
    )
    .bind(job_id)
    .bind(status)
    .bind(last_error)
    .execute(pool)
    .await
    {
        error!(job_id = %job_id, status, error = %e, "Failed to update build job");
    }
}
