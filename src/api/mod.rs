pub mod rate_limiter;
pub mod shopping_search;
pub mod types;

pub use rate_limiter::RequestPacer;
pub use shopping_search::ShoppingSearchClient;
pub use types::*;
