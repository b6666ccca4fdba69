pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use error::{ConfigError, DeliveryError, FetchError, StorageError};
pub use health::HealthChecker;
pub use metrics::ScanMetrics;
