use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vendors reaching this many recorded violations are blacklisted.
pub const BLACKLIST_THRESHOLD: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationStatus {
    New,
    Warned,
    Resolved,
    Repeat,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::New => "new",
            ViolationStatus::Warned => "warned",
            ViolationStatus::Resolved => "resolved",
            ViolationStatus::Repeat => "repeat",
        }
    }
}

impl fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(ViolationStatus::New),
            "warned" => Ok(ViolationStatus::Warned),
            "resolved" => Ok(ViolationStatus::Resolved),
            "repeat" => Ok(ViolationStatus::Repeat),
            other => Err(format!("unknown violation status: {}", other)),
        }
    }
}

/// A listing offering a product below its MAP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub brand: String,
    pub product_name: String,
    pub map_price: i64,
    pub vendor_name: String,
    pub violation_price: i64,
    pub violation_url: String,
    pub violation_rate: f64,
    pub discovered_at: DateTime<Utc>,
    pub status: ViolationStatus,
}

/// Rounds to one decimal on the exact binary value, exact halves to even.
pub(crate) fn round_one_decimal(value: f64) -> f64 {
    format!("{:.1}", value).parse().unwrap_or(value)
}

/// Percentage shortfall below MAP, rounded to one decimal.
///
/// Shortfalls that round to 0.0 are reported as 0.1 so that every violation
/// carries a positive rate.
pub fn violation_rate(map_price: i64, violation_price: i64) -> f64 {
    let shortfall = (map_price - violation_price) as f64 / map_price as f64 * 100.0;
    let rounded = round_one_decimal(shortfall);
    if rounded <= 0.0 {
        0.1
    } else {
        rounded
    }
}

/// A violation as persisted, with its storage id and write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: i64,
    #[serde(flatten)]
    pub violation: Violation,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub vendor_name: String,
    pub violation_count: i64,
    pub last_violation_at: DateTime<Utc>,
    pub blacklisted: bool,
}

impl VendorRecord {
    pub fn first(vendor_name: impl Into<String>, at: DateTime<Utc>) -> Self {
        let violation_count = 1;
        Self {
            vendor_name: vendor_name.into(),
            violation_count,
            last_violation_at: at,
            blacklisted: violation_count >= BLACKLIST_THRESHOLD,
        }
    }

    pub fn register_violation(&mut self, at: DateTime<Utc>) {
        self.violation_count += 1;
        self.last_violation_at = at;
        self.blacklisted = self.violation_count >= BLACKLIST_THRESHOLD;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_time: DateTime<Utc>,
    pub products_scanned: i64,
    pub products_failed: i64,
    pub violations_found: i64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorAggregate {
    pub vendor_name: String,
    pub count: i64,
    pub mean_violation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAggregate {
    pub product_name: String,
    pub count: i64,
    pub mean_violation_rate: f64,
    pub lowest_price: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationFilter {
    pub brand: Option<String>,
    pub status: Option<ViolationStatus>,
    pub since: Option<DateTime<Utc>>,
}

impl ViolationFilter {
    pub fn brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn status(mut self, status: ViolationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_rate_rounding() {
        assert_eq!(violation_rate(18000, 15300), 15.0);
        assert_eq!(violation_rate(18000, 15000), 16.7);
        assert_eq!(violation_rate(25000, 23125), 7.5);
        assert_eq!(violation_rate(32000, 0), 100.0);
    }

    #[test]
    fn test_violation_rate_rounds_halves_to_even() {
        assert_eq!(violation_rate(400, 399), 0.2);
        assert_eq!(violation_rate(400, 397), 0.8);
        assert_eq!(round_one_decimal(2.25), 2.2);
        assert_eq!(round_one_decimal(16.66), 16.7);
    }

    #[test]
    fn test_violation_rate_is_always_positive() {
        assert_eq!(violation_rate(1_000_000, 999_999), 0.1);
        assert!(violation_rate(18000, 17999) > 0.0);
    }

    #[test]
    fn test_vendor_blacklists_at_threshold_and_stays() {
        let now = Utc::now();
        let mut record = VendorRecord::first("A마켓", now);
        assert!(!record.blacklisted);

        record.register_violation(now);
        assert_eq!(record.violation_count, 2);
        assert!(!record.blacklisted);

        record.register_violation(now);
        assert_eq!(record.violation_count, 3);
        assert!(record.blacklisted);

        record.register_violation(now);
        assert!(record.blacklisted);
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            ViolationStatus::New,
            ViolationStatus::Warned,
            ViolationStatus::Resolved,
            ViolationStatus::Repeat,
        ] {
            assert_eq!(status.as_str().parse::<ViolationStatus>(), Ok(status));
        }
        assert!("pending".parse::<ViolationStatus>().is_err());
    }
}
