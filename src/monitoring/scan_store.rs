use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::database::{decode_timestamp, encode_timestamp};
use super::records::{
    round_one_decimal, ProductAggregate, ScanRecord, VendorAggregate, Violation,
    ViolationFilter, ViolationRecord, ViolationStatus,
};
use crate::core::error::StorageError;

/// Append-only store of violations and scan summaries.
///
/// Writers are serialized through the database-wide writer lock; reads go
/// straight to the pool and only ever see committed rows.
pub struct ScanStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: i64,
    brand: String,
    product_name: String,
    map_price: i64,
    vendor_name: String,
    violation_price: i64,
    violation_url: String,
    violation_rate: f64,
    discovered_at: String,
    status: String,
    created_at: String,
}

impl TryFrom<ViolationRow> for ViolationRecord {
    type Error = StorageError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ViolationStatus>()
            .map_err(|_| StorageError::Corrupt {
                column: "status".to_string(),
                value: row.status.clone(),
            })?;

        Ok(ViolationRecord {
            id: row.id,
            violation: Violation {
                brand: row.brand,
                product_name: row.product_name,
                map_price: row.map_price,
                vendor_name: row.vendor_name,
                violation_price: row.violation_price,
                violation_url: row.violation_url,
                violation_rate: row.violation_rate,
                discovered_at: decode_timestamp("discovered_at", &row.discovered_at)?,
                status,
            },
            created_at: decode_timestamp("created_at", &row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScanRow {
    scan_time: String,
    products_scanned: i64,
    products_failed: i64,
    violations_found: i64,
    duration_seconds: f64,
}

impl TryFrom<ScanRow> for ScanRecord {
    type Error = StorageError;

    fn try_from(row: ScanRow) -> Result<Self, Self::Error> {
        Ok(ScanRecord {
            scan_time: decode_timestamp("scan_time", &row.scan_time)?,
            products_scanned: row.products_scanned,
            products_failed: row.products_failed,
            violations_found: row.violations_found,
            duration_seconds: row.duration_seconds,
        })
    }
}

impl ScanStore {
    pub fn new(pool: SqlitePool, writer: Arc<Mutex<()>>) -> Self {
        Self { pool, writer }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn writer(&self) -> &Arc<Mutex<()>> {
        &self.writer
    }

    /// Inserts a new row and returns its id. Not idempotent.
    pub async fn append(&self, violation: &Violation) -> Result<i64, StorageError> {
        let _writer = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        Self::insert_violation(&mut conn, violation).await
    }

    pub async fn append_scan(&self, record: &ScanRecord) -> Result<(), StorageError> {
        let _writer = self.writer.lock().await;
        let mut conn = self.pool.acquire().await?;
        Self::insert_scan(&mut conn, record).await
    }

    /// Caller holds the writer lock.
    pub(crate) async fn insert_violation(
        conn: &mut SqliteConnection,
        violation: &Violation,
    ) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO violations (
                brand, product_name, map_price, vendor_name, violation_price,
                violation_url, violation_rate, discovered_at, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&violation.brand)
        .bind(&violation.product_name)
        .bind(violation.map_price)
        .bind(&violation.vendor_name)
        .bind(violation.violation_price)
        .bind(&violation.violation_url)
        .bind(violation.violation_rate)
        .bind(encode_timestamp(&violation.discovered_at))
        .bind(violation.status.as_str())
        .bind(encode_timestamp(&Utc::now()))
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Caller holds the writer lock.
    pub(crate) async fn insert_scan(
        conn: &mut SqliteConnection,
        record: &ScanRecord,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO scan_records (
                scan_time, products_scanned, products_failed, violations_found, duration_seconds
            )
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(encode_timestamp(&record.scan_time))
        .bind(record.products_scanned)
        .bind(record.products_failed)
        .bind(record.violations_found)
        .bind(record.duration_seconds)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Status changes come from the external review workflow. Returns false
    /// when no violation has the given id.
    pub async fn update_status(&self, id: i64, status: ViolationStatus) -> Result<bool, StorageError> {
        let _writer = self.writer.lock().await;

        let result = sqlx::query("UPDATE violations SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent `discovered_at` first.
    pub async fn query(
        &self,
        filter: &ViolationFilter,
        limit: usize,
    ) -> Result<Vec<ViolationRecord>, StorageError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT id, brand, product_name, map_price, vendor_name, violation_price,
                   violation_url, violation_rate, discovered_at, status, created_at
            FROM violations
            WHERE 1 = 1
            "#,
        );

        if let Some(brand) = &filter.brand {
            builder.push(" AND brand = ").push_bind(brand.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(since) = &filter.since {
            builder
                .push(" AND discovered_at >= ")
                .push_bind(encode_timestamp(since));
        }

        builder
            .push(" ORDER BY discovered_at DESC, id DESC LIMIT ")
            .push_bind(limit as i64);

        let rows = builder
            .build_query_as::<ViolationRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ViolationRecord::try_from).collect()
    }

    /// Vendors with the most violations first, mean rate rounded to one
    /// decimal.
    pub async fn aggregate_by_vendor(&self) -> Result<Vec<VendorAggregate>, StorageError> {
        let rows: Vec<(String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT vendor_name, COUNT(*) AS count, AVG(violation_rate) AS mean_violation_rate
            FROM violations
            GROUP BY vendor_name
            ORDER BY count DESC, vendor_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(vendor_name, count, mean)| VendorAggregate {
                vendor_name,
                count,
                mean_violation_rate: round_one_decimal(mean),
            })
            .collect())
    }

    pub async fn aggregate_by_product(&self) -> Result<Vec<ProductAggregate>, StorageError> {
        let rows: Vec<(String, i64, f64, i64)> = sqlx::query_as(
            r#"
            SELECT product_name,
                   COUNT(*) AS count,
                   AVG(violation_rate) AS mean_violation_rate,
                   MIN(violation_price) AS lowest_price
            FROM violations
            GROUP BY product_name
            ORDER BY count DESC, product_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(product_name, count, mean, lowest_price)| ProductAggregate {
                product_name,
                count,
                mean_violation_rate: round_one_decimal(mean),
                lowest_price,
            })
            .collect())
    }

    pub async fn count_violations(&self, since: Option<DateTime<Utc>>) -> Result<i64, StorageError> {
        let (count,): (i64,) = match since {
            Some(since) => {
                sqlx::query_as("SELECT COUNT(*) FROM violations WHERE discovered_at >= ?")
                    .bind(encode_timestamp(&since))
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM violations")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    pub async fn mean_violation_rate(&self) -> Result<Option<f64>, StorageError> {
        let (mean,): (Option<f64>,) = sqlx::query_as("SELECT AVG(violation_rate) FROM violations")
            .fetch_one(&self.pool)
            .await?;
        Ok(mean.map(round_one_decimal))
    }

    /// Newest scan first.
    pub async fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT scan_time, products_scanned, products_failed, violations_found, duration_seconds
            FROM scan_records
            ORDER BY scan_time DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScanRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::database::MonitorDatabase;
    use chrono::Duration;

    fn violation(brand: &str, vendor: &str, price: i64, at: DateTime<Utc>) -> Violation {
        Violation {
            brand: brand.to_string(),
            product_name: format!("{} 상품", brand),
            map_price: 18000,
            vendor_name: vendor.to_string(),
            violation_price: price,
            violation_url: format!("https://shop.example.com/{}", vendor),
            violation_rate: crate::monitoring::records::violation_rate(18000, price),
            discovered_at: at,
            status: ViolationStatus::New,
        }
    }

    async fn store() -> Arc<ScanStore> {
        let db = MonitorDatabase::in_memory().await.unwrap();
        db.scan_store()
    }

    #[tokio::test]
    async fn test_append_creates_new_rows_each_time() {
        let store = store().await;
        let v = violation("고래미", "A", 15300, Utc::now());

        let first = store.append(&v).await.unwrap();
        let second = store.append(&v).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.count_violations(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_filters_brand_and_status_newest_first() {
        let store = store().await;
        let base = Utc::now() - Duration::hours(5);

        let older = store.append(&violation("고래미", "A", 15000, base)).await.unwrap();
        let newer = store
            .append(&violation("고래미", "B", 16000, base + Duration::hours(2)))
            .await
            .unwrap();
        let resolved = store
            .append(&violation("고래미", "C", 17000, base + Duration::hours(3)))
            .await
            .unwrap();
        store
            .append(&violation("설래담", "D", 14000, base + Duration::hours(4)))
            .await
            .unwrap();
        assert!(store.update_status(resolved, ViolationStatus::Resolved).await.unwrap());

        let filter = ViolationFilter::default()
            .brand("고래미")
            .status(ViolationStatus::New);
        let records = store.query(&filter, 50).await.unwrap();

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer, older]);
        assert!(records
            .iter()
            .all(|r| r.violation.brand == "고래미" && r.violation.status == ViolationStatus::New));
    }

    #[tokio::test]
    async fn test_query_since_and_limit() {
        let store = store().await;
        let now = Utc::now();
        for hours in [30, 20, 10, 1] {
            store
                .append(&violation("고래미", "A", 15000, now - Duration::hours(hours)))
                .await
                .unwrap();
        }

        let recent = store
            .query(&ViolationFilter::default().since(now - Duration::hours(24)), 10)
            .await
            .unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].violation.discovered_at > recent[1].violation.discovered_at);

        let limited = store.query(&ViolationFilter::default(), 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_of_missing_row() {
        let store = store().await;
        assert!(!store.update_status(42, ViolationStatus::Warned).await.unwrap());
    }

    #[tokio::test]
    async fn test_aggregates() {
        let store = store().await;
        let now = Utc::now();
        store.append(&violation("고래미", "A", 15300, now)).await.unwrap();
        store.append(&violation("고래미", "A", 17000, now)).await.unwrap();
        store.append(&violation("고래미", "B", 16200, now)).await.unwrap();

        let vendors = store.aggregate_by_vendor().await.unwrap();
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[0].vendor_name, "A");
        assert_eq!(vendors[0].count, 2);
        // (15.0 + 5.6) / 2
        assert_eq!(vendors[0].mean_violation_rate, 10.3);
        assert_eq!(vendors[1].vendor_name, "B");
        assert_eq!(vendors[1].mean_violation_rate, 10.0);

        let products = store.aggregate_by_product().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].count, 3);
        assert_eq!(products[0].lowest_price, 15300);

        assert_eq!(store.mean_violation_rate().await.unwrap(), Some(10.2));
    }

    #[tokio::test]
    async fn test_scan_records_newest_first() {
        let store = store().await;
        let now = Utc::now();
        for (offset, found) in [(2, 1), (1, 4)] {
            store
                .append_scan(&ScanRecord {
                    scan_time: now - Duration::minutes(offset),
                    products_scanned: 3,
                    products_failed: 0,
                    violations_found: found,
                    duration_seconds: 12.5,
                })
                .await
                .unwrap();
        }

        let scans = store.recent_scans(10).await.unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].violations_found, 4);
        assert_eq!(scans[1].violations_found, 1);
    }

    #[tokio::test]
    async fn test_empty_store_statistics() {
        let store = store().await;
        assert_eq!(store.mean_violation_rate().await.unwrap(), None);
        assert!(store.aggregate_by_vendor().await.unwrap().is_empty());
        assert!(store.recent_scans(5).await.unwrap().is_empty());
    }
}
