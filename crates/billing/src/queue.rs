//! Build request hand-off
//!
//! The service never runs builds itself. It publishes a `BuildRequest`; the
//! build worker consumes it and reports back through
//! `SubscriptionService::complete_build`.

use async_trait::async_trait;
use eduhub_shared::TenantId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{SubscriptionError, SubscriptionResult};

/// "Build requested" event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub build_id: Uuid,
    pub tenant_id: TenantId,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

#[async_trait]
pub trait BuildQueue: Send + Sync {
    /// Publish a build request. Errors are reported as `BuildTrigger`.
    async fn publish(&self, request: &BuildRequest) -> SubscriptionResult<()>;
}

/// Queue backed by the `mobile_app_build_jobs` table
pub struct PgBuildQueue {
    pool: PgPool,
}

impl PgBuildQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildQueue for PgBuildQueue {
    async fn publish(&self, request: &BuildRequest) -> SubscriptionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mobile_app_build_jobs (id, tenant_id, status, requested_at)
            VALUES ($1, $2, 'pending', $3)
            "#,
        )
        .bind(request.build_id)
        .bind(&request.tenant_id)
        .bind(request.requested_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SubscriptionError::BuildTrigger(e.to_string()))?;

        Ok(())
    }
}

/// In-memory queue that records published requests
#[derive(Default)]
pub struct InMemoryBuildQueue {
    published: Mutex<Vec<BuildRequest>>,
    reject: AtomicBool,
}

impl InMemoryBuildQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again)
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<BuildRequest> {
        self.published
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .lock()
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BuildQueue for InMemoryBuildQueue {
    async fn publish(&self, request: &BuildRequest) -> SubscriptionResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SubscriptionError::BuildTrigger(
                "build queue unavailable".to_string(),
            ));
        }
        self.published
            .lock()
            .map_err(|_| SubscriptionError::BuildTrigger("build queue lock poisoned".to_string()))?
            .push(request.clone());
        Ok(())
    }
}
