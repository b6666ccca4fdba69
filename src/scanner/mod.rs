pub mod detector;
pub mod fetcher;
pub mod price;
pub mod scheduler;
pub mod sources;

pub use detector::ViolationDetector;
pub use fetcher::{FetchSettings, ListingFetcher, ListingSource};
pub use price::extract_price;
pub use scheduler::{
    ScanContext, ScanError, ScanInterval, ScanPermit, ScanPlan, ScanScheduler, ScanState,
};
pub use sources::StaticListingSource;
