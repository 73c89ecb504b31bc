/// arbfeed-live — Arb Detector
/// ROI of two-leg odds pairs, cross-provider fixture matching, opportunity merge.
/// Pure code: nothing here does I/O or fails on bad input.

pub mod error;
pub mod matcher;
pub mod merger;
pub mod model;
pub mod roi;

pub use error::{CoreError, ErrorCategory, UpstreamFailure};
pub use matcher::{
    build_event_key, cross_provider_fixtures, extract_quotes, extract_teams, group_by_event_key,
    group_quotes_by_event_key, normalize_team_name, truncate_to_hour,
};
pub use merger::merge_provider_opportunities;
pub use model::{
    ArbitrageOpportunity, EventInfo, EventKey, Leg, MarketKey, MarketQuote, ProviderId, QuoteProvider,
};
pub use roi::{balanced_stakes, compute_two_leg_roi, implied_probability, is_arbitrage};
