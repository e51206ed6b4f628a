pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod oracle;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, MemoryTripStore, PgTripStore, TripStore};
pub use error::{ErrorKind, ReconError};
pub use oracle::AnthropicClient;
pub use service::Reconciler;
