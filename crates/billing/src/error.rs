//! Subscription error types

use eduhub_shared::SharedError;
use thiserror::Error;

/// Subscription-specific errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Subscription not found for tenant: {0}")]
    NotFound(String),

    #[error("Premium subscription required for mobile app access")]
    Forbidden,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to start mobile app build: {0}")]
    BuildTrigger(String),
}

impl From<sqlx::Error> for SubscriptionError {
    fn from(err: sqlx::Error) -> Self {
        SubscriptionError::Storage(err.to_string())
    }
}

impl From<SharedError> for SubscriptionError {
    fn from(err: SharedError) -> Self {
        SubscriptionError::InvalidInput(err.to_string())
    }
}

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;
