//! EduHub Subscription Core
//!
//! Tenant subscriptions, premium upgrades, and the branded mobile app build
//! state machine. Persistence and build hand-off sit behind the
//! `SubscriptionStore` and `BuildQueue` traits.

pub mod error;
pub mod model;
pub mod pg_store;
pub mod plans;
pub mod queue;
pub mod service;
pub mod store;

pub use error::{SubscriptionError, SubscriptionResult};
pub use model::{
    BuildOutcome, BuildResult, MobileAppBuild, MobileAppRequestOutcome, PaymentDetails,
    PaymentRecord, Period, Pricing, Subscription,
};
pub use pg_store::PgSubscriptionStore;
pub use plans::{Features, SubscriptionPolicy, ESTIMATED_BUILD_TIME};
pub use queue::{BuildQueue, BuildRequest, InMemoryBuildQueue, PgBuildQueue};
pub use service::SubscriptionService;
pub use store::{InMemorySubscriptionStore, SubscriptionStore};
