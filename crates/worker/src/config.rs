//! Worker configuration

use eduhub_billing::SubscriptionPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Build queue
    pub build_script_path: PathBuf,
    pub build_script_timeout: Duration,
    pub poll_interval: Duration,
    /// Jobs claimed per poll
    pub build_batch_size: i64,

    // Maintenance schedules (6-field cron, seconds first)
    pub expiry_sweep_cron: String,
    pub stale_build_sweep_cron: String,
    pub job_cleanup_cron: String,
    pub job_retention_days: i32,

    pub policy: SubscriptionPolicy,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),

            build_script_path: env::var("BUILD_SCRIPT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./scripts/build-client-apk.sh")),
            build_script_timeout: Duration::from_secs(
                parse_or::<u64>("BUILD_SCRIPT_TIMEOUT_MINUTES", 60)
                    .max(1)
                    .saturating_mul(60),
            ),
            poll_interval: Duration::from_secs(parse_or::<u64>("BUILD_POLL_INTERVAL_SECS", 10).max(1)),
            build_batch_size: parse_or::<i64>("BUILD_BATCH_SIZE", 2).max(1),

            expiry_sweep_cron: env::var("EXPIRY_SWEEP_CRON")
                .unwrap_or_else(|_| "0 */15 * * * *".to_string()),
            stale_build_sweep_cron: env::var("STALE_BUILD_SWEEP_CRON")
                .unwrap_or_else(|_| "0 */5 * * * *".to_string()),
            job_cleanup_cron: env::var("JOB_CLEANUP_CRON")
                .unwrap_or_else(|_| "0 30 3 * * *".to_string()),
            job_retention_days: parse_or("JOB_RETENTION_DAYS", 30),

            policy: SubscriptionPolicy::from_env(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup() {
        for var in [
            "DATABASE_URL",
            "BUILD_SCRIPT_PATH",
            "BUILD_SCRIPT_TIMEOUT_MINUTES",
            "BUILD_POLL_INTERVAL_SECS",
            "JOB_RETENTION_DAYS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup();
        env::set_var("DATABASE_URL", "postgres://test");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(
            config.build_script_path,
            PathBuf::from("./scripts/build-client-apk.sh")
        );
        assert_eq!(config.build_script_timeout, Duration::from_secs(3600));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.job_retention_days, 30);

        cleanup();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        cleanup();
        assert!(matches!(
            WorkerConfig::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_fall_back() {
        cleanup();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("BUILD_POLL_INTERVAL_SECS", "soon");
        env::set_var("BUILD_SCRIPT_TIMEOUT_MINUTES", "5");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.build_script_timeout, Duration::from_secs(300));

        cleanup();
    }

    #[test]
    #[serial]
    fn test_huge_script_timeout_saturates() {
        cleanup();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("BUILD_SCRIPT_TIMEOUT_MINUTES", u64::MAX.to_string());

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.build_script_timeout, Duration::from_secs(u64::MAX));

        cleanup();
    }
}
