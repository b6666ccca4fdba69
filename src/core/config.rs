use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::api::types::Product;
use crate::core::error::ConfigError;
use crate::scanner::fetcher::{FetchSettings, DEFAULT_MAX_LISTINGS};
use crate::scanner::scheduler::{ScanInterval, ScanPlan};

const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_products")]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub interval: ScanInterval,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_listings: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: ScanInterval::OneHour,
            min_delay_secs: 2.0,
            max_delay_secs: 5.0,
            request_timeout_secs: 30,
            max_retries: 1,
            max_listings: DEFAULT_MAX_LISTINGS,
        }
    }
}

impl ScanConfig {
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            min_delay: Duration::from_secs_f64(self.min_delay_secs),
            max_delay: Duration::from_secs_f64(self.max_delay_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            max_listings: self.max_listings,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openapi.naver.com/v1/search/shop.json".to_string(),
            client_id: None,
            client_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/map_monitor.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhooks: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            timeout_secs: 10,
        }
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: "info".to_string(),
        }
    }
}

fn default_products() -> Vec<Product> {
    vec![
        Product::new("고래미", "고래미 타코와사비", 18000, "고래미 타코와사비"),
        Product::new("고래미", "고래미 가니미소", 25000, "고래미 가니미소"),
        Product::new("설래담", "설래담 연포탕", 32000, "설래담 연포탕"),
    ]
}

impl Config {
    /// Loads `.env`, then the TOML file named by `MAP_CONFIG` (optional), then
    /// `MAP_*` environment overrides such as `MAP_SCAN__INTERVAL=30m`.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = env::var("MAP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from(Path::new(&path)).required(false))
            .add_source(
                ::config::Environment::with_prefix("MAP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(contents, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scan = &self.scan;
        if !(scan.min_delay_secs >= 0.0 && scan.min_delay_secs.is_finite()) {
            return Err(ConfigError::invalid(
                "scan.min_delay_secs",
                "must be a finite, non-negative number of seconds",
            ));
        }
        if !(scan.max_delay_secs.is_finite() && scan.min_delay_secs <= scan.max_delay_secs) {
            return Err(ConfigError::invalid(
                "scan.max_delay_secs",
                format!(
                    "must be at least min_delay_secs ({})",
                    scan.min_delay_secs
                ),
            ));
        }
        if scan.max_listings == 0 {
            return Err(ConfigError::invalid("scan.max_listings", "must be at least 1"));
        }
        if scan.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "scan.request_timeout_secs",
                "must be at least 1",
            ));
        }

        let mut names = HashSet::new();
        for product in &self.products {
            if product.map_price <= 0 {
                return Err(ConfigError::invalid(
                    format!("products.{}.map_price", product.name),
                    "MAP must be a positive integer",
                ));
            }
            if product.brand.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("products.{}.brand", product.name),
                    "brand cannot be empty",
                ));
            }
            if product.search_keyword.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("products.{}.search_keyword", product.name),
                    "search keyword cannot be empty",
                ));
            }
            if !names.insert(product.name.as_str()) {
                return Err(ConfigError::invalid(
                    "products",
                    format!("duplicate product name: {}", product.name),
                ));
            }
        }

        for url in &self.notifications.webhooks {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => {
                    return Err(ConfigError::invalid(
                        "notifications.webhooks",
                        format!("unsupported URL scheme: {}", parsed.scheme()),
                    ))
                }
                Err(e) => {
                    return Err(ConfigError::invalid(
                        "notifications.webhooks",
                        format!("invalid URL {}: {}", url, e),
                    ))
                }
            }
        }

        Ok(())
    }

    pub fn scan_plan(&self) -> ScanPlan {
        ScanPlan {
            products: self.products.clone(),
            sinks: self.notifications.webhooks.clone(),
            interval: self.scan.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reproduce_product_catalogue() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.products.len(), 3);
        assert_eq!(config.products[0].map_price, 18000);
        assert_eq!(config.scan.interval, ScanInterval::OneHour);
        assert_eq!(config.scan.max_listings, 10);
        assert!(config.notifications.webhooks.is_empty());
    }

    #[test]
    fn test_shipped_config_file_is_valid() {
        let config =
            Config::from_toml_str(include_str!("../../config/monitor.toml")).unwrap();

        assert_eq!(config.products.len(), 3);
        assert_eq!(config.server.port, 3000);
        assert!(config.source.client_id.is_none());
    }

    #[test]
    fn test_parses_full_file() {
        let config = Config::from_toml_str(
            r#"
[scan]
interval = "30m"
min_delay_secs = 1.5
max_delay_secs = 3.0

[notifications]
webhooks = ["https://hooks.example.com/T000/B000"]

[[products]]
brand = "고래미"
name = "고래미 타코와사비"
map_price = 18000
search_keyword = "고래미 타코와사비"
"#,
        )
        .unwrap();

        assert_eq!(config.scan.interval, ScanInterval::ThirtyMinutes);
        assert_eq!(config.products.len(), 1);
        let settings = config.scan.fetch_settings();
        assert_eq!(settings.min_delay, Duration::from_millis(1500));
        assert_eq!(settings.max_delay, Duration::from_secs(3));
        assert_eq!(config.scan_plan().sinks.len(), 1);
    }

    #[test]
    fn test_rejects_inverted_delay_window() {
        let result = Config::from_toml_str(
            r#"
[scan]
min_delay_secs = 5.0
max_delay_secs = 1.0
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_bad_products_and_sinks() {
        let zero_map = r#"
[[products]]
brand = "b"
name = "p"
map_price = 0
search_keyword = "p"
"#;
        assert!(Config::from_toml_str(zero_map).is_err());

        let duplicate = r#"
[[products]]
brand = "b"
name = "p"
map_price = 100
search_keyword = "p"

[[products]]
brand = "b"
name = "p"
map_price = 200
search_keyword = "p"
"#;
        assert!(Config::from_toml_str(duplicate).is_err());

        let ftp_sink = r#"
[notifications]
webhooks = ["ftp://example.com/hook"]
"#;
        assert!(Config::from_toml_str(ftp_sink).is_err());
    }

    #[test]
    fn test_rejects_unknown_interval() {
        let result = Config::from_toml_str(
            r#"
[scan]
interval = "15m"
"#,
        );
        assert!(result.is_err());
    }
}
