/// arbfeed-live — Price Monitor
///
/// Upstream odds adapters. Each one reaches the network only through the
/// `ProviderScheduler` it is handed:
///   A) the-odds-api.com — raw bookmaker odds, arbitrage computed here
///   B) odds-api.io /arbitrage-bets — ready-made arbs, ROI recomputed here

pub mod http;
pub mod odds_api_io;
pub mod the_odds_api;

use arb_detector::ProviderId;
use provider_scheduler::{CredentialLookup, OddsAdapter};
use std::env;
use std::sync::Arc;
use std::time::Duration;

pub use odds_api_io::{parse_arb_bets, OddsApiIoAdapter};
pub use the_odds_api::{parse_events, TheOddsApiAdapter};

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TheOddsApiSettings {
    pub base_url: String,
    pub sports:   Vec<String>,
    pub regions:  String,
}

#[derive(Debug, Clone)]
pub struct OddsApiIoSettings {
    pub base_url: String,
    pub sports:   Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub enabled:         Vec<ProviderId>,
    pub request_timeout: Duration,
    pub the_odds_api:    TheOddsApiSettings,
    pub odds_api_io:     OddsApiIoSettings,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    let list = split_list(&env::var(key).unwrap_or_default());
    if list.is_empty() { split_list(default) } else { list }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled:         ProviderId::ALL.to_vec(),
            request_timeout: Duration::from_secs(15),
            the_odds_api: TheOddsApiSettings {
                base_url: "https://api.the-odds-api.com".into(),
                sports:   split_list("soccer_epl,basketball_nba"),
                regions:  "eu".into(),
            },
            odds_api_io: OddsApiIoSettings {
                base_url: "https://odds-api.io".into(),
                sports:   split_list("soccer_epl,basketball_nba"),
            },
        }
    }
}

impl ProviderSettings {
    /// Defaults overridden by environment. Unknown names in `ENABLED_PROVIDERS`
    /// are returned as errors so a typo doesn't silently disable a feed.
    pub fn from_env() -> Result<Self, String> {
        let d = Self::default();

        let enabled = match env::var("ENABLED_PROVIDERS").ok().filter(|s| !s.trim().is_empty()) {
            Some(raw) => split_list(&raw)
                .iter()
                .map(|s| s.parse::<ProviderId>())
                .collect::<Result<Vec<_>, _>>()?,
            None => d.enabled,
        };

        let request_timeout = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.request_timeout);

        Ok(Self {
            enabled,
            request_timeout,
            the_odds_api: TheOddsApiSettings {
                base_url: env::var("THE_ODDS_API_BASE_URL").unwrap_or(d.the_odds_api.base_url),
                sports:   env_list("THE_ODDS_API_SPORTS", "soccer_epl,basketball_nba"),
                regions:  env::var("THE_ODDS_API_REGIONS").unwrap_or(d.the_odds_api.regions),
            },
            odds_api_io: OddsApiIoSettings {
                base_url: env::var("ODDS_API_IO_BASE_URL").unwrap_or(d.odds_api_io.base_url),
                sports:   env_list("ODDS_API_IO_SPORTS", "soccer_epl,basketball_nba"),
            },
        })
    }
}

/// One adapter per enabled provider, sharing a single HTTP client.
pub fn build_adapters(
    settings:    &ProviderSettings,
    credentials: Arc<dyn CredentialLookup>,
) -> Vec<Arc<dyn OddsAdapter>> {
    let client = http::build_client(settings.request_timeout);
    let mut adapters: Vec<Arc<dyn OddsAdapter>> = Vec::new();

    for provider in &settings.enabled {
        match provider {
            ProviderId::TheOddsApi => adapters.push(Arc::new(TheOddsApiAdapter::new(
                client.clone(),
                settings.the_odds_api.clone(),
                credentials.clone(),
            ))),
            ProviderId::OddsApiIo => adapters.push(Arc::new(OddsApiIoAdapter::new(
                client.clone(),
                settings.odds_api_io.clone(),
                credentials.clone(),
            ))),
        }
    }
    adapters
}
