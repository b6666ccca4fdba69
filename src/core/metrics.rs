use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus counters for the scan lifecycle, rendered on `/metrics`.
pub struct ScanMetrics {
    registry: Registry,
    pub scans_completed: IntCounter,
    pub triggers_rejected: IntCounter,
    pub violations_detected: IntCounter,
    pub fetch_failures: IntCounter,
    pub storage_failures: IntCounter,
    pub scan_running: IntGauge,
    pub scan_duration_seconds: Histogram,
}

impl ScanMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("map_monitor".to_string()), None)?;

        let scans_completed = IntCounter::new("scans_completed_total", "Completed scan cycles")?;
        let triggers_rejected = IntCounter::new(
            "scan_triggers_rejected_total",
            "Triggers rejected because a scan was already running",
        )?;
        let violations_detected =
            IntCounter::new("violations_detected_total", "Violations emitted by the detector")?;
        let fetch_failures =
            IntCounter::new("fetch_failures_total", "Product fetches that returned an error")?;
        let storage_failures = IntCounter::new(
            "storage_failures_total",
            "Scan persistence steps aborted by a storage error",
        )?;
        let scan_running = IntGauge::new("scan_running", "1 while a scan cycle is running")?;
        let scan_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("scan_duration_seconds", "Wall time of a scan cycle")
                .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;

        registry.register(Box::new(scans_completed.clone()))?;
        registry.register(Box::new(triggers_rejected.clone()))?;
        registry.register(Box::new(violations_detected.clone()))?;
        registry.register(Box::new(fetch_failures.clone()))?;
        registry.register(Box::new(storage_failures.clone()))?;
        registry.register(Box::new(scan_running.clone()))?;
        registry.register(Box::new(scan_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            scans_completed,
            triggers_rejected,
            violations_detected,
            fetch_failures,
            storage_failures,
            scan_running,
            scan_duration_seconds,
        })
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
