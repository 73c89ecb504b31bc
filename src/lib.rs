/// arbfeed-live — feed service
/// Wires the price-monitor adapters, the provider scheduler and the arb
/// detector into one poll-and-merge cycle shared by the binaries.

pub mod config;
pub mod feed;

pub use config::AppConfig;
pub use feed::{FeedService, FeedSnapshot, ProviderFailure};
