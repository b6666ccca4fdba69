use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::database::{decode_timestamp, encode_timestamp};
use super::records::{VendorRecord, Violation};
use crate::core::error::StorageError;

/// Cumulative violation counts per vendor. Counts only ever grow.
pub struct VendorLedger {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

#[derive(sqlx::FromRow)]
struct VendorRow {
    vendor_name: String,
    violation_count: i64,
    last_violation_at: String,
    blacklisted: bool,
}

impl TryFrom<VendorRow> for VendorRecord {
    type Error = StorageError;

    fn try_from(row: VendorRow) -> Result<Self, Self::Error> {
        Ok(VendorRecord {
            last_violation_at: decode_timestamp("last_violation_at", &row.last_violation_at)?,
            vendor_name: row.vendor_name,
            violation_count: row.violation_count,
            blacklisted: row.blacklisted,
        })
    }
}

/// Result of applying one violation inside a write transaction.
pub(crate) struct LedgerUpdate {
    pub record: VendorRecord,
    pub newly_blacklisted: bool,
}

impl LedgerUpdate {
    /// Call after the enclosing transaction committed.
    pub(crate) fn log_transition(&self) {
        if self.newly_blacklisted {
            tracing::warn!(
                "🚫 Vendor {} blacklisted after {} violations",
                self.record.vendor_name,
                self.record.violation_count
            );
        }
    }
}

impl VendorLedger {
    pub fn new(pool: SqlitePool, writer: Arc<Mutex<()>>) -> Self {
        Self { pool, writer }
    }

    pub(crate) fn writer(&self) -> &Arc<Mutex<()>> {
        &self.writer
    }

    /// Counts one more violation against the vendor, creating its record on
    /// first sight, and returns the updated record.
    pub async fn record(&self, violation: &Violation) -> Result<VendorRecord, StorageError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let update = Self::apply(&mut tx, violation).await?;
        tx.commit().await?;

        update.log_transition();
        Ok(update.record)
    }

    /// Read-modify-upsert on `conn`. Caller holds the writer lock and owns
    /// the transaction.
    pub(crate) async fn apply(
        conn: &mut SqliteConnection,
        violation: &Violation,
    ) -> Result<LedgerUpdate, StorageError> {
        let existing = sqlx::query_as::<_, VendorRow>(
            r#"
            SELECT vendor_name, violation_count, last_violation_at, blacklisted
            FROM vendors WHERE vendor_name = ?
            "#,
        )
        .bind(&violation.vendor_name)
        .fetch_optional(&mut *conn)
        .await?;

        let (record, was_blacklisted) = match existing {
            Some(row) => {
                let mut record = VendorRecord::try_from(row)?;
                let was_blacklisted = record.blacklisted;
                record.register_violation(violation.discovered_at);
                (record, was_blacklisted)
            }
            None => (
                VendorRecord::first(violation.vendor_name.clone(), violation.discovered_at),
                false,
            ),
        };

        sqlx::query(
            r#"
            INSERT INTO vendors (vendor_name, violation_count, last_violation_at, blacklisted)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(vendor_name) DO UPDATE SET
                violation_count = excluded.violation_count,
                last_violation_at = excluded.last_violation_at,
                blacklisted = excluded.blacklisted
            "#,
        )
        .bind(&record.vendor_name)
        .bind(record.violation_count)
        .bind(encode_timestamp(&record.last_violation_at))
        .bind(record.blacklisted)
        .execute(&mut *conn)
        .await?;

        Ok(LedgerUpdate {
            newly_blacklisted: record.blacklisted && !was_blacklisted,
            record,
        })
    }

    pub async fn get(&self, vendor_name: &str) -> Result<Option<VendorRecord>, StorageError> {
        let row = sqlx::query_as::<_, VendorRow>(
            r#"
            SELECT vendor_name, violation_count, last_violation_at, blacklisted
            FROM vendors WHERE vendor_name = ?
            "#,
        )
        .bind(vendor_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VendorRecord::try_from).transpose()
    }

    /// Blacklisted vendors, most violations first, ties by name.
    pub async fn list_blacklisted(&self) -> Result<Vec<VendorRecord>, StorageError> {
        let rows = sqlx::query_as::<_, VendorRow>(
            r#"
            SELECT vendor_name, violation_count, last_violation_at, blacklisted
            FROM vendors
            WHERE blacklisted = 1
            ORDER BY violation_count DESC, vendor_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VendorRecord::try_from).collect()
    }

    pub async fn all(&self) -> Result<Vec<VendorRecord>, StorageError> {
        let rows = sqlx::query_as::<_, VendorRow>(
            r#"
            SELECT vendor_name, violation_count, last_violation_at, blacklisted
            FROM vendors
            ORDER BY violation_count DESC, vendor_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VendorRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::database::MonitorDatabase;
    use crate::monitoring::records::ViolationStatus;
    use chrono::{DateTime, Duration, Utc};

    fn violation(vendor: &str, at: DateTime<Utc>) -> Violation {
        Violation {
            brand: "고래미".to_string(),
            product_name: "고래미 타코와사비".to_string(),
            map_price: 18000,
            vendor_name: vendor.to_string(),
            violation_price: 15300,
            violation_url: "https://shop.example.com/p".to_string(),
            violation_rate: 15.0,
            discovered_at: at,
            status: ViolationStatus::New,
        }
    }

    async fn ledger() -> Arc<VendorLedger> {
        let db = MonitorDatabase::in_memory().await.unwrap();
        db.vendor_ledger()
    }

    #[tokio::test]
    async fn test_blacklist_after_third_violation() {
        let ledger = ledger().await;
        let start = Utc::now();

        let first = ledger.record(&violation("A마켓", start)).await.unwrap();
        assert_eq!(first.violation_count, 1);
        assert!(!first.blacklisted);

        let second = ledger
            .record(&violation("A마켓", start + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(second.violation_count, 2);
        assert!(!second.blacklisted);

        let third_at = start + Duration::hours(2);
        let third = ledger.record(&violation("A마켓", third_at)).await.unwrap();
        assert_eq!(third.violation_count, 3);
        assert!(third.blacklisted);

        let fourth = ledger
            .record(&violation("A마켓", start + Duration::hours(3)))
            .await
            .unwrap();
        assert_eq!(fourth.violation_count, 4);
        assert!(fourth.blacklisted);

        let stored = ledger.get("A마켓").await.unwrap().unwrap();
        assert_eq!(stored.violation_count, 4);
        assert!(stored.last_violation_at > third_at);
    }

    #[tokio::test]
    async fn test_list_blacklisted_ordering() {
        let ledger = ledger().await;
        let now = Utc::now();
        for (vendor, count) in [("C몰", 3), ("B쇼핑", 4), ("A마켓", 3), ("D스토어", 2)] {
            for _ in 0..count {
                ledger.record(&violation(vendor, now)).await.unwrap();
            }
        }

        let names: Vec<String> = ledger
            .list_blacklisted()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.vendor_name)
            .collect();
        assert_eq!(names, vec!["B쇼핑", "A마켓", "C몰"]);

        assert_eq!(ledger.all().await.unwrap().len(), 4);
        assert!(ledger.get("E마트").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_increments() {
        let ledger = ledger().await;
        let now = Utc::now();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.record(&violation("A마켓", now)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let record = ledger.get("A마켓").await.unwrap().unwrap();
        assert_eq!(record.violation_count, 10);
    }
}
