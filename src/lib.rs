pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;

// Always available for integration tests but marked as test-only
#[cfg(any(test, debug_assertions, feature = "test-utils"))]
pub mod test_utils;

pub use config::AppConfig;
pub use database::Database;
pub use error::FileApiError;
