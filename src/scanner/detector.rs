use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::price::extract_price;
use crate::api::types::{Product, RawListing};
use crate::monitoring::records::{violation_rate, Violation, ViolationStatus};

/// Compares listing prices against a product's MAP.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViolationDetector;

impl ViolationDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, product: &Product, listings: &[RawListing]) -> Vec<Violation> {
        self.detect_at(product, listings, Utc::now())
    }

    /// Emits at most one violation per vendor for this product, keeping the
    /// lowest offending price. Vendors appear in first-seen order.
    pub fn detect_at(
        &self,
        product: &Product,
        listings: &[RawListing],
        discovered_at: DateTime<Utc>,
    ) -> Vec<Violation> {
        let mut violations: Vec<Violation> = Vec::new();
        let mut by_vendor: HashMap<&str, usize> = HashMap::new();

        for listing in listings {
            let Some(price) = extract_price(&listing.price_text) else {
                tracing::trace!(
                    "No price in '{}' from {}, skipping",
                    listing.price_text,
                    listing.vendor_name
                );
                continue;
            };

            if price >= product.map_price {
                continue;
            }

            match by_vendor.get(listing.vendor_name.as_str()) {
                Some(&index) => {
                    let existing = &mut violations[index];
                    if price < existing.violation_price {
                        existing.violation_price = price;
                        existing.violation_url = listing.url.clone();
                        existing.violation_rate = violation_rate(product.map_price, price);
                    }
                }
                None => {
                    by_vendor.insert(listing.vendor_name.as_str(), violations.len());
                    violations.push(Violation {
                        brand: product.brand.clone(),
                        product_name: product.name.clone(),
                        map_price: product.map_price,
                        vendor_name: listing.vendor_name.clone(),
                        violation_price: price,
                        violation_url: listing.url.clone(),
                        violation_rate: violation_rate(product.map_price, price),
                        discovered_at,
                        status: ViolationStatus::New,
                    });
                }
            }
        }

        for violation in &violations {
            tracing::info!(
                "⚠️  {} sells {} at {} (MAP {}, -{:.1}%)",
                violation.vendor_name,
                violation.product_name,
                violation.violation_price,
                violation.map_price,
                violation.violation_rate
            );
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tako() -> Product {
        Product::new("고래미", "고래미 타코와사비", 18000, "고래미 타코와사비")
    }

    fn listing(vendor: &str, price: &str) -> RawListing {
        RawListing::new(
            vendor,
            "고래미 타코와사비 500g",
            price,
            format!("https://shop.example.com/{}/{}", vendor, price),
        )
    }

    #[test]
    fn test_end_to_end_scenario() {
        let listings = vec![
            listing("A", "15,300원"),
            listing("A", "17,000원"),
            listing("B", "18,500원"),
        ];

        let violations = ViolationDetector::new().detect(&tako(), &listings);

        assert_eq!(violations.len(), 1);
        let v = &violations[0];
        assert_eq!(v.vendor_name, "A");
        assert_eq!(v.violation_price, 15300);
        assert_eq!(v.violation_rate, 15.0);
        assert_eq!(v.status, ViolationStatus::New);
        assert_eq!(v.violation_url, "https://shop.example.com/A/15,300원");
    }

    #[test]
    fn test_dedup_keeps_worst_price_regardless_of_order() {
        let listings = vec![listing("V", "16000"), listing("V", "15000")];
        let violations = ViolationDetector::new().detect(&tako(), &listings);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_price, 15000);
        assert_eq!(violations[0].violation_rate, 16.7);
        assert_eq!(violations[0].violation_url, "https://shop.example.com/V/15000");
    }

    #[test]
    fn test_skips_compliant_and_unpriced_listings() {
        let listings = vec![
            listing("A", "18,000원"),
            listing("B", "문의"),
            listing("C", "19,800원"),
        ];
        assert!(ViolationDetector::new().detect(&tako(), &listings).is_empty());
    }

    #[test]
    fn test_violation_invariants_hold() {
        let listings: Vec<RawListing> = (1..=40)
            .map(|i| listing(&format!("vendor-{}", i % 7), &format!("{}원", 17990 - i * 97)))
            .collect();
        let product = tako();
        let at = Utc::now();

        let violations = ViolationDetector::new().detect_at(&product, &listings, at);

        assert_eq!(violations.len(), 7);
        for v in &violations {
            assert!(v.violation_price < v.map_price);
            assert!(v.violation_rate > 0.0);
            let expected = ((v.map_price - v.violation_price) as f64 / v.map_price as f64
                * 1000.0)
                .round()
                / 10.0;
            assert_eq!(v.violation_rate, expected);
            assert_eq!(v.discovered_at, at);
        }
    }

    #[test]
    fn test_vendor_order_follows_first_appearance() {
        let listings = vec![
            listing("C", "10000"),
            listing("A", "12000"),
            listing("C", "9000"),
            listing("B", "11000"),
        ];
        let vendors: Vec<String> = ViolationDetector::new()
            .detect(&tako(), &listings)
            .into_iter()
            .map(|v| v.vendor_name)
            .collect();

        assert_eq!(vendors, vec!["C", "A", "B"]);
    }
}
