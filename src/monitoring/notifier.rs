use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::records::Violation;
use crate::core::error::DeliveryError;
use crate::core::health::HealthChecker;

/// Violations listed in a digest; the rest are only counted.
pub const DIGEST_ITEM_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub color: String,
    pub fields: Vec<AttachmentField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

fn format_price(price: i64) -> String {
    let digits = price.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if price < 0 {
        out.insert(0, '-');
    }
    out
}

pub fn build_digest(violations: &[Violation]) -> WebhookPayload {
    let mut brands: Vec<&str> = Vec::new();
    for v in violations {
        if !brands.contains(&v.brand.as_str()) {
            brands.push(v.brand.as_str());
        }
    }

    let fields = violations
        .iter()
        .take(DIGEST_ITEM_LIMIT)
        .map(|v| AttachmentField {
            title: v.product_name.clone(),
            value: format!(
                "vendor: {}\nprice: {} (MAP: {})\nrate: {:.1}%",
                v.vendor_name,
                format_price(v.violation_price),
                format_price(v.map_price),
                v.violation_rate
            ),
            short: false,
        })
        .collect();

    let mut text = format!(
        "🚨 MAP violations detected: {} total ({})",
        violations.len(),
        brands.join(", ")
    );
    if violations.len() > DIGEST_ITEM_LIMIT {
        text.push_str(&format!(
            "\nShowing first {}, {} more in the violation log",
            DIGEST_ITEM_LIMIT,
            violations.len() - DIGEST_ITEM_LIMIT
        ));
    }

    WebhookPayload {
        text,
        attachments: vec![Attachment {
            color: "danger".to_string(),
            fields,
        }],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub sink: String,
    pub delivered: bool,
}

/// Handles of the per-sink delivery tasks. Dropping it detaches the tasks.
#[derive(Debug, Default)]
pub struct NotificationDispatch {
    handles: Vec<JoinHandle<DeliveryOutcome>>,
}

impl NotificationDispatch {
    pub fn submitted(&self) -> usize {
        self.handles.len()
    }

    pub async fn wait(self) -> Vec<DeliveryOutcome> {
        futures::future::join_all(self.handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.ok())
            .collect()
    }
}

/// Best-effort webhook delivery. Failures are logged and never retried.
/// The latest delivery result sets the `notifier` health component.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    health: Option<HealthChecker>,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthChecker) -> Self {
        self.health = Some(health);
        self
    }

    /// Spawns one delivery task per sink; returns immediately.
    pub fn notify(&self, violations: &[Violation], sinks: &[String]) -> NotificationDispatch {
        if violations.is_empty() || sinks.is_empty() {
            return NotificationDispatch::default();
        }

        let payload = Arc::new(build_digest(violations));
        let handles = sinks
            .iter()
            .cloned()
            .map(|sink| {
                let client = self.client.clone();
                let health = self.health.clone();
                let payload = payload.clone();
                tokio::spawn(async move {
                    let delivered = match deliver(&client, &sink, &payload).await {
                        Ok(()) => {
                            tracing::info!("📨 Digest delivered to {}", sink);
                            true
                        }
                        Err(e) => {
                            tracing::warn!("📭 Digest delivery to {} failed: {}", sink, e);
                            false
                        }
                    };
                    if let Some(health) = health {
                        health.update_component("notifier", delivered).await;
                    }
                    DeliveryOutcome { sink, delivered }
                })
            })
            .collect();

        NotificationDispatch { handles }
    }
}

async fn deliver(client: &Client, sink: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
    let response = client.post(sink).json(payload).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DeliveryError::Rejected {
            status: status.as_u16(),
        });
    }
    Ok(())
}
