use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::detector::ViolationDetector;
use super::fetcher::ListingFetcher;
use crate::api::types::Product;
use crate::core::error::{FetchError, StorageError};
use crate::core::health::HealthChecker;
use crate::core::metrics::ScanMetrics;
use crate::monitoring::notifier::{NotificationDispatch, WebhookNotifier};
use crate::monitoring::records::{ScanRecord, Violation};
use crate::monitoring::scan_store::ScanStore;
use crate::monitoring::vendor_ledger::VendorLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScanInterval {
    Manual,
    ThirtyMinutes,
    OneHour,
    ThreeHours,
    SixHours,
}

impl ScanInterval {
    /// `None` for manual-only scanning.
    pub fn period(&self) -> Option<Duration> {
        match self {
            ScanInterval::Manual => None,
            ScanInterval::ThirtyMinutes => Some(Duration::from_secs(30 * 60)),
            ScanInterval::OneHour => Some(Duration::from_secs(60 * 60)),
            ScanInterval::ThreeHours => Some(Duration::from_secs(3 * 60 * 60)),
            ScanInterval::SixHours => Some(Duration::from_secs(6 * 60 * 60)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanInterval::Manual => "manual",
            ScanInterval::ThirtyMinutes => "30m",
            ScanInterval::OneHour => "1h",
            ScanInterval::ThreeHours => "3h",
            ScanInterval::SixHours => "6h",
        }
    }
}

impl fmt::Display for ScanInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ScanInterval::Manual),
            "30m" => Ok(ScanInterval::ThirtyMinutes),
            "1h" => Ok(ScanInterval::OneHour),
            "3h" => Ok(ScanInterval::ThreeHours),
            "6h" => Ok(ScanInterval::SixHours),
            other => Err(format!(
                "unsupported scan interval '{}' (expected manual, 30m, 1h, 3h or 6h)",
                other
            )),
        }
    }
}

impl TryFrom<String> for ScanInterval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScanInterval> for String {
    fn from(interval: ScanInterval) -> Self {
        interval.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Idle,
    Running,
}

/// What to scan and where to report it.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub products: Vec<Product>,
    pub sinks: Vec<String>,
    pub interval: ScanInterval,
}

/// Persistent state shared by every scan: the only cross-scan state. Store
/// and ledger are expected to come from the same `MonitorDatabase`.
#[derive(Clone)]
pub struct ScanContext {
    pub store: Arc<ScanStore>,
    pub ledger: Arc<VendorLedger>,
}

impl ScanContext {
    pub fn new(store: Arc<ScanStore>, ledger: Arc<VendorLedger>) -> Self {
        Self { store, ledger }
    }

    /// Writes violations, the scan record and the ledger updates in one
    /// transaction. On error nothing is kept, so the step can be re-run.
    pub async fn persist(&self, outcome: &ScanOutcome) -> Result<(), StorageError> {
        let _writer = self.store.writer().lock().await;
        let mut tx = self.store.pool().begin().await?;

        for violation in &outcome.violations {
            ScanStore::insert_violation(&mut tx, violation).await?;
        }
        ScanStore::insert_scan(&mut tx, &outcome.record).await?;

        let mut updates = Vec::with_capacity(outcome.violations.len());
        for violation in &outcome.violations {
            updates.push(VendorLedger::apply(&mut tx, violation).await?);
        }

        tx.commit().await?;

        for update in &updates {
            update.log_transition();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductFailure {
    pub product_name: String,
    pub error: FetchError,
}

/// In-memory result of the fetch/detect phase of one cycle.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub record: ScanRecord,
    pub violations: Vec<Violation>,
    pub failures: Vec<ProductFailure>,
}

#[derive(Debug)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub notifications: NotificationDispatch,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyRunning,

    /// Persistence rolled back. The detected violations are handed back for
    /// [`ScanScheduler::complete`].
    #[error("scan persistence failed: {source}")]
    Persistence {
        #[source]
        source: StorageError,
        outcome: Box<ScanOutcome>,
    },
}

/// Exclusive right to run one cycle. The scheduler reports `Running` until
/// the permit is dropped.
pub struct ScanPermit {
    _cycle: OwnedMutexGuard<()>,
    running: Arc<AtomicBool>,
    metrics: Arc<ScanMetrics>,
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.metrics.scan_running.set(0);
    }
}

pub struct ScanScheduler {
    plan: ScanPlan,
    fetcher: ListingFetcher,
    detector: ViolationDetector,
    context: ScanContext,
    notifier: WebhookNotifier,
    metrics: Arc<ScanMetrics>,
    health: HealthChecker,
    cycle_lock: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
    monitoring: watch::Sender<bool>,
}

impl ScanScheduler {
    pub fn new(
        plan: ScanPlan,
        fetcher: ListingFetcher,
        context: ScanContext,
        notifier: WebhookNotifier,
        metrics: Arc<ScanMetrics>,
        health: HealthChecker,
    ) -> Self {
        let (monitoring, _) = watch::channel(false);
        Self {
            plan,
            fetcher,
            detector: ViolationDetector::new(),
            context,
            notifier: notifier.with_health(health.clone()),
            metrics,
            health,
            cycle_lock: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
            monitoring,
        }
    }

    pub fn state(&self) -> ScanState {
        if self.running.load(Ordering::SeqCst) {
            ScanState::Running
        } else {
            ScanState::Idle
        }
    }

    pub fn monitoring_enabled(&self) -> bool {
        *self.monitoring.borrow()
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    pub fn context(&self) -> &ScanContext {
        &self.context
    }

    pub fn fetcher(&self) -> &ListingFetcher {
        &self.fetcher
    }

    /// Claims the cycle without waiting. Rejected, not queued, while another
    /// cycle or a persistence retry holds it.
    pub fn try_begin(&self) -> Result<ScanPermit, ScanError> {
        let Ok(cycle) = self.cycle_lock.clone().try_lock_owned() else {
            self.metrics.triggers_rejected.inc();
            tracing::info!("⏸️  Scan trigger rejected: a scan is already running");
            return Err(ScanError::AlreadyRunning);
        };

        self.running.store(true, Ordering::SeqCst);
        self.metrics.scan_running.set(1);
        Ok(ScanPermit {
            _cycle: cycle,
            running: self.running.clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Runs one full cycle now.
    pub async fn trigger(&self) -> Result<ScanReport, ScanError> {
        let permit = self.try_begin()?;
        self.run(permit).await
    }

    /// Runs the cycle claimed by `permit`.
    pub async fn run(&self, permit: ScanPermit) -> Result<ScanReport, ScanError> {
        let outcome = self.collect().await;
        let result = self.finish(outcome).await;
        drop(permit);
        result
    }

    /// Fetch and detect over every product, strictly one at a time. Fetch
    /// failures skip the product; nothing here aborts the cycle.
    async fn collect(&self) -> ScanOutcome {
        let started = Instant::now();
        let scan_time = Utc::now();
        let mut violations = Vec::new();
        let mut failures = Vec::new();

        tracing::info!(
            "🔍 Scan started over {} products",
            self.plan.products.len()
        );

        {
            let mut session = self.fetcher.open_session();
            for product in &self.plan.products {
                match session.fetch(product).await {
                    Ok(listings) => {
                        let found = self.detector.detect(product, &listings);
                        tracing::debug!(
                            "{}: {} listings, {} violations",
                            product.name,
                            listings.len(),
                            found.len()
                        );
                        violations.extend(found);
                    }
                    Err(e) => {
                        self.metrics.fetch_failures.inc();
                        tracing::warn!("❌ Fetch failed for {}: {}", product.name, e);
                        failures.push(ProductFailure {
                            product_name: product.name.clone(),
                            error: e,
                        });
                    }
                }
            }
        }

        let source_ok = self.plan.products.is_empty() || failures.len() < self.plan.products.len();
        self.health.update_component("listing_source", source_ok).await;

        let duration = started.elapsed();
        self.metrics.violations_detected.inc_by(violations.len() as u64);
        self.metrics
            .scan_duration_seconds
            .observe(duration.as_secs_f64());

        ScanOutcome {
            record: ScanRecord {
                scan_time,
                products_scanned: self.plan.products.len() as i64,
                products_failed: failures.len() as i64,
                violations_found: violations.len() as i64,
                duration_seconds: duration.as_secs_f64(),
            },
            violations,
            failures,
        }
    }

    /// Re-attempts persistence of an outcome returned by
    /// [`ScanError::Persistence`], then notifies. Holds the cycle like a scan.
    pub async fn complete(&self, outcome: ScanOutcome) -> Result<ScanReport, ScanError> {
        let permit = self.try_begin()?;
        let result = self.finish(outcome).await;
        drop(permit);
        result
    }

    async fn finish(&self, outcome: ScanOutcome) -> Result<ScanReport, ScanError> {
        if let Err(source) = self.context.persist(&outcome).await {
            self.metrics.storage_failures.inc();
            self.health.update_component("database", false).await;
            tracing::error!(
                "💾 Persisting scan failed, {} violations kept in memory: {}",
                outcome.violations.len(),
                source
            );
            return Err(ScanError::Persistence {
                source,
                outcome: Box::new(outcome),
            });
        }
        self.health.update_component("database", true).await;

        let notifications = self.notifier.notify(&outcome.violations, &self.plan.sinks);
        self.metrics.scans_completed.inc();

        tracing::info!(
            "✅ Scan finished: {} products ({} failed), {} violations, {:.1}s, {} digests submitted",
            outcome.record.products_scanned,
            outcome.record.products_failed,
            outcome.record.violations_found,
            outcome.record.duration_seconds,
            notifications.submitted()
        );

        Ok(ScanReport {
            outcome,
            notifications,
        })
    }

    /// Enables monitoring and spawns the periodic loop. Returns `None` for
    /// manual-only plans.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.monitoring.send_replace(true);

        let period = self.plan.interval.period()?;
        let scheduler = self.clone();
        Some(tokio::spawn(async move { scheduler.run_periodic(period).await }))
    }

    /// Prevents the next automatic trigger. A running scan finishes.
    pub fn stop(&self) {
        if self.monitoring.send_replace(false) {
            tracing::info!("🛑 Monitoring stopped");
        }
    }

    async fn run_periodic(&self, period: Duration) {
        let mut enabled = self.monitoring.subscribe();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("🔁 Monitoring every {}", self.plan.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = enabled.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if !*enabled.borrow_and_update() {
                break;
            }

            match self.trigger().await {
                Ok(_) | Err(ScanError::AlreadyRunning) => {}
                Err(e) => tracing::error!("Scheduled scan failed: {}", e),
            }
        }

        tracing::info!("⏹️  Periodic monitoring loop exited");
    }
}
