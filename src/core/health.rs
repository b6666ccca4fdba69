use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub database: bool,
    pub listing_source: bool,
    pub notifier: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, bool>,
}

impl ComponentHealth {
    pub fn get(&self, key: &str) -> Option<bool> {
        match key {
            "database" => Some(self.database),
            "listing_source" => Some(self.listing_source),
            "notifier" => Some(self.notifier),
            _ => self.extra.get(key).copied(),
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    start_time: std::time::Instant,
    status: Arc<RwLock<ComponentHealth>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    /// Components start healthy until a scan reports otherwise; the database
    /// is marked once it has been opened.
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            status: Arc::new(RwLock::new(ComponentHealth {
                database: false,
                listing_source: true,
                notifier: true,
                extra: HashMap::new(),
            })),
        }
    }

    pub async fn get_status(&self) -> HealthStatus {
        let components = self.status.read().await.clone();

        HealthStatus {
            status: if components.database && components.listing_source {
                "healthy".to_string()
            } else {
                "degraded".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            components,
        }
    }

    pub async fn update_component(&self, component: &str, healthy: bool) {
        let mut status = self.status.write().await;
        match component {
            "database" => status.database = healthy,
            "listing_source" => status.listing_source = healthy,
            "notifier" => status.notifier = healthy,
            _ => {
                status.extra.insert(component.to_string(), healthy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_degraded_until_database_reported() {
        let checker = HealthChecker::new();
        assert_eq!(checker.get_status().await.status, "degraded");

        checker.update_component("database", true).await;
        assert_eq!(checker.get_status().await.status, "healthy");

        checker.update_component("listing_source", false).await;
        let status = checker.get_status().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.components.get("listing_source"), Some(false));
    }

    #[tokio::test]
    async fn test_extra_components_are_tracked() {
        let checker = HealthChecker::new();
        checker.update_component("last_scan", false).await;

        let status = checker.get_status().await;
        assert_eq!(status.components.get("last_scan"), Some(false));
        assert_eq!(status.components.get("unknown"), None);
    }
}
