//! Application configuration

use eduhub_billing::SubscriptionPolicy;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub run_migrations: bool,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    /// Shared secret for the build result callback; the route is disabled when unset
    pub build_callback_token: Option<String>,

    // Subscriptions and mobile app builds
    pub policy: SubscriptionPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            build_callback_token: match env::var("BUILD_CALLBACK_TOKEN") {
                Ok(token) if token.is_empty() => None,
                Ok(token) if token.len() < 32 => {
                    return Err(ConfigError::WeakSecret(
                        "BUILD_CALLBACK_TOKEN must be at least 32 characters",
                    ));
                }
                Ok(token) => Some(token),
                Err(_) => None,
            },

            policy: SubscriptionPolicy::from_env(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "JWT_SECRET",
        "BUILD_CALLBACK_TOKEN",
        "DATABASE_MAX_CONNECTIONS",
        "RUN_MIGRATIONS",
        "SUBSCRIPTION_TRIAL_DAYS",
        "MOBILE_APP_BUILD_TIMEOUT_MINUTES",
    ];

    fn setup_minimal_config() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 10);
        assert!(config.run_migrations);
        assert!(config.build_callback_token.is_none());
        assert_eq!(config.policy.trial_days, 30);
        assert_eq!(config.policy.build_deadline, time::Duration::minutes(90));
        assert_eq!(config.policy.default_app_version, "1.0.0");

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        setup_minimal_config();
        env::remove_var("DATABASE_URL");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_short_secrets_rejected() {
        setup_minimal_config();
        env::set_var("JWT_SECRET", "too-short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        setup_minimal_config();
        env::set_var("BUILD_CALLBACK_TOKEN", "also-too-short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        setup_minimal_config();
        env::set_var("BUILD_CALLBACK_TOKEN", "build-callback-token-with-32-chars!!");
        env::set_var("DATABASE_MAX_CONNECTIONS", "4");
        env::set_var("RUN_MIGRATIONS", "false");
        env::set_var("SUBSCRIPTION_TRIAL_DAYS", "14");
        env::set_var("MOBILE_APP_BUILD_TIMEOUT_MINUTES", "120");

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.build_callback_token.as_deref(),
            Some("build-callback-token-with-32-chars!!")
        );
        assert_eq!(config.database_max_connections, 4);
        assert!(!config.run_migrations);
        assert_eq!(config.policy.trial_days, 14);
        assert_eq!(config.policy.build_deadline, time::Duration::minutes(120));

        cleanup_config();
    }
}
