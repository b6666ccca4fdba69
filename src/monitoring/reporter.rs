use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::records::{ScanRecord, VendorAggregate, VendorRecord};
use super::scan_store::ScanStore;
use super::vendor_ledger::VendorLedger;
use crate::core::error::StorageError;

const TOP_VENDORS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub generated_at: DateTime<Utc>,
    pub violations_today: i64,
    pub total_violations: i64,
    pub mean_violation_rate: Option<f64>,
    pub last_scan: Option<ScanRecord>,
    pub top_vendors: Vec<VendorAggregate>,
    pub blacklisted_vendors: Vec<VendorRecord>,
}

pub struct ViolationReporter {
    store: Arc<ScanStore>,
    ledger: Arc<VendorLedger>,
}

impl ViolationReporter {
    pub fn new(store: Arc<ScanStore>, ledger: Arc<VendorLedger>) -> Self {
        Self { store, ledger }
    }

    pub async fn generate_summary(&self) -> Result<MonitoringSummary, StorageError> {
        let now = Utc::now();
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|start| start.and_utc())
            .unwrap_or(now);

        let mut top_vendors = self.store.aggregate_by_vendor().await?;
        top_vendors.truncate(TOP_VENDORS);

        Ok(MonitoringSummary {
            generated_at: now,
            violations_today: self.store.count_violations(Some(today_start)).await?,
            total_violations: self.store.count_violations(None).await?,
            mean_violation_rate: self.store.mean_violation_rate().await?,
            last_scan: self.store.recent_scans(1).await?.into_iter().next(),
            top_vendors,
            blacklisted_vendors: self.ledger.list_blacklisted().await?,
        })
    }

    pub fn format_summary(&self, summary: &MonitoringSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════════════╗\n");
        output.push_str("║             MAP PRICE MONITORING SUMMARY                             ║\n");
        output.push_str("╚══════════════════════════════════════════════════════════════════════╝\n\n");

        output.push_str(&format!(
            "🚨 Violations: {} today | {} total | avg rate {}\n",
            summary.violations_today,
            summary.total_violations,
            summary
                .mean_violation_rate
                .map(|rate| format!("{:.1}%", rate))
                .unwrap_or_else(|| "-".to_string())
        ));

        match &summary.last_scan {
            Some(scan) => output.push_str(&format!(
                "🕐 Last scan: {} ({} products, {} failed, {} violations, {:.1}s)\n\n",
                scan.scan_time.format("%Y-%m-%d %H:%M:%S UTC"),
                scan.products_scanned,
                scan.products_failed,
                scan.violations_found,
                scan.duration_seconds
            )),
            None => output.push_str("🕐 Last scan: waiting\n\n"),
        }

        if !summary.top_vendors.is_empty() {
            output.push_str("🏢 Vendors by violations:\n");
            for vendor in &summary.top_vendors {
                output.push_str(&format!(
                    "   • {:20} {:>4} violations, avg {:.1}%\n",
                    vendor.vendor_name, vendor.count, vendor.mean_violation_rate
                ));
            }
            output.push('\n');
        }

        if summary.blacklisted_vendors.is_empty() {
            output.push_str("✅ No blacklisted vendors\n");
        } else {
            output.push_str("🚫 Blacklisted vendors:\n");
            for vendor in &summary.blacklisted_vendors {
                output.push_str(&format!(
                    "   • {} ({} violations, last {})\n",
                    vendor.vendor_name,
                    vendor.violation_count,
                    vendor.last_violation_at.format("%Y-%m-%d")
                ));
            }
        }

        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::database::MonitorDatabase;
    use crate::monitoring::records::{Violation, ViolationStatus};
    use chrono::Duration;

    #[tokio::test]
    async fn test_summary_combines_store_and_ledger() {
        let db = MonitorDatabase::in_memory().await.unwrap();
        let (store, ledger) = (db.scan_store(), db.vendor_ledger());
        let reporter = ViolationReporter::new(store.clone(), ledger.clone());

        let empty = reporter.generate_summary().await.unwrap();
        assert_eq!(empty.total_violations, 0);
        assert!(empty.last_scan.is_none());
        assert!(reporter.format_summary(&empty).contains("waiting"));

        let now = Utc::now();
        for days_ago in [0, 0, 3] {
            let v = Violation {
                brand: "설래담".to_string(),
                product_name: "설래담 연포탕".to_string(),
                map_price: 32000,
                vendor_name: "C몰".to_string(),
                violation_price: 28800,
                violation_url: "https://shop.example.com/c".to_string(),
                violation_rate: 10.0,
                discovered_at: now - Duration::days(days_ago),
                status: ViolationStatus::New,
            };
            store.append(&v).await.unwrap();
            ledger.record(&v).await.unwrap();
        }
        store
            .append_scan(&ScanRecord {
                scan_time: now,
                products_scanned: 3,
                products_failed: 1,
                violations_found: 2,
                duration_seconds: 9.0,
            })
            .await
            .unwrap();

        let summary = reporter.generate_summary().await.unwrap();
        assert_eq!(summary.total_violations, 3);
        assert!(summary.violations_today >= 1);
        assert_eq!(summary.mean_violation_rate, Some(10.0));
        assert_eq!(summary.top_vendors[0].vendor_name, "C몰");
        assert_eq!(summary.blacklisted_vendors.len(), 1);
        assert_eq!(summary.last_scan.as_ref().unwrap().products_failed, 1);

        let text = reporter.format_summary(&summary);
        assert!(text.contains("Blacklisted vendors"));
        assert!(text.contains("C몰"));
    }
}
