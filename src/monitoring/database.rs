use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::scan_store::ScanStore;
use super::vendor_ledger::VendorLedger;
use crate::core::error::StorageError;

/// Owns the SQLite pool and schema shared by the scan store and the vendor
/// ledger. Both are built once and share a single writer lock.
pub struct MonitorDatabase {
    pool: SqlitePool,
    scan_store: Arc<ScanStore>,
    vendor_ledger: Arc<VendorLedger>,
}

impl MonitorDatabase {
    pub async fn open(database_path: &str) -> Result<Self, StorageError> {
        if database_path == ":memory:" || database_path == "sqlite::memory:" {
            return Self::in_memory().await;
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            format!("sqlite://{}", database_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self::with_pool(pool);
        db.initialize_schema().await?;

        tracing::info!("✅ Monitor database opened at {}", database_path);
        Ok(db)
    }

    /// Single-connection in-memory database. Every pooled connection to
    /// `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self::with_pool(pool);
        db.initialize_schema().await?;
        Ok(db)
    }

    fn with_pool(pool: SqlitePool) -> Self {
        let writer = Arc::new(Mutex::new(()));
        Self {
            scan_store: Arc::new(ScanStore::new(pool.clone(), writer.clone())),
            vendor_ledger: Arc::new(VendorLedger::new(pool.clone(), writer)),
            pool,
        }
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                brand TEXT NOT NULL,
                product_name TEXT NOT NULL,
                map_price INTEGER NOT NULL,
                vendor_name TEXT NOT NULL,
                violation_price INTEGER NOT NULL,
                violation_url TEXT NOT NULL,
                violation_rate REAL NOT NULL,
                discovered_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_time TEXT NOT NULL,
                products_scanned INTEGER NOT NULL,
                products_failed INTEGER NOT NULL DEFAULT 0,
                violations_found INTEGER NOT NULL,
                duration_seconds REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vendors (
                vendor_name TEXT PRIMARY KEY,
                violation_count INTEGER NOT NULL,
                last_violation_at TEXT NOT NULL,
                blacklisted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_violations_discovered
            ON violations(discovered_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_violations_brand_status
            ON violations(brand, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_vendors_blacklisted
            ON vendors(blacklisted, violation_count DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("✅ Monitor database schema initialized");

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn scan_store(&self) -> Arc<ScanStore> {
        self.scan_store.clone()
    }

    pub fn vendor_ledger(&self) -> Arc<VendorLedger> {
        self.vendor_ledger.clone()
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub(crate) fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt {
            column: column.to_string(),
            value: value.to_string(),
        })
}
