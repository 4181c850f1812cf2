// =============================================================================
// Feed layer — bar fan-out and order intent distribution
// =============================================================================

pub mod data_feed;
pub mod order_feed;

pub use data_feed::{BarConsumer, CandleStreamProvider, DataFeedSubscription};
pub use order_feed::{OrderConsumer, OrderFeedSubscription};
