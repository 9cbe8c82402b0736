//! EduHub Shared Types and Utilities
//!
//! This crate contains identifier and status types, errors, and database helpers
//! shared by the API server, the subscription core, and the build worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
