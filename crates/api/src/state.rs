//! Shared application state

use eduhub_billing::SubscriptionService;
use std::sync::Arc;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub subscriptions: Arc<SubscriptionService>,
    pub jwt_manager: JwtManager,
}

impl AppState {
    pub fn new(config: Config, subscriptions: Arc<SubscriptionService>) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config: Arc::new(config),
            subscriptions,
            jwt_manager,
        }
    }

    /// State handed to the auth middleware layers
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            build_callback_token: self.config.build_callback_token.clone(),
        }
    }
}
