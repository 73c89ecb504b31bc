//! odds-api.io — ready-made arbitrage bets
//!
//! GET {base}/v1/arbitrage-bets?sport={sport}&apiKey=…
//! Response: { "arb_bets": [ { id?, home_team, away_team, commence_time?, league?, market?, roi,
//!                              outcome_a: { outcome, odds, bookmaker }, outcome_b: { … } } ] }
//!
//! The upstream `roi` is ignored; ROI is always recomputed from the two legs.

use arb_detector::{
    normalize_team_name, ArbitrageOpportunity, CoreError, ErrorCategory, EventInfo, Leg, MarketKey, ProviderId,
};
use async_trait::async_trait;
use logger::{new_correlation_id, now_iso};
use provider_scheduler::{CredentialLookup, OddsAdapter, ProviderScheduler};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::http::{fetch_text, malformed_payload};
use crate::OddsApiIoSettings;

#[derive(Debug, Deserialize)]
struct ArbBetsResponse {
    #[serde(default)]
    arb_bets: Vec<ArbBet>,
}

#[derive(Debug, Deserialize)]
struct ArbBet {
    id:            Option<String>,
    home_team:     String,
    away_team:     String,
    commence_time: Option<String>,
    league:        Option<String>,
    market:        Option<String>,
    outcome_a:     ArbSide,
    outcome_b:     ArbSide,
}

#[derive(Debug, Deserialize)]
struct ArbSide {
    outcome:   String,
    odds:      f64,
    bookmaker: String,
}

fn derived_id(bet: &ArbBet, market: MarketKey) -> String {
    let slug = |s: &str| normalize_team_name(s).replace(' ', "-");
    let date = bet.commence_time.as_deref().unwrap_or("").get(..13).unwrap_or("");
    format!("{}-{}-{}-{}", slug(&bet.home_team), slug(&bet.away_team), date, market)
}

fn to_opportunity(bet: ArbBet, sport: &str, found_at: &str) -> Option<ArbitrageOpportunity> {
    let market = match bet.market.as_deref() {
        None => MarketKey::H2h,
        Some(raw) => MarketKey::from_upstream(raw)?,
    };
    let id = match &bet.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => derived_id(&bet, market),
    };
    let event = EventInfo {
        name:   format!("{} vs {}", bet.home_team, bet.away_team),
        date:   bet.commence_time.clone().unwrap_or_default(),
        league: bet.league.clone().unwrap_or_else(|| sport.to_string()),
    };
    let leg = |side: ArbSide| Leg { bookmaker: side.bookmaker, market, odds: side.odds, outcome: side.outcome };
    let sport_family = sport.split('_').next().unwrap_or(sport);

    ArbitrageOpportunity::from_legs(
        format!("odds-api-io:{id}"),
        sport_family,
        event,
        [leg(bet.outcome_a), leg(bet.outcome_b)],
        found_at,
        Some(ProviderId::OddsApiIo),
    )
}

/// Parse one `/arbitrage-bets` response. Bets on unknown markets, or whose
/// recomputed ROI is not positive, are dropped.
pub fn parse_arb_bets(raw: &str, sport: &str, found_at: &str) -> Result<Vec<ArbitrageOpportunity>, serde_json::Error> {
    let resp: ArbBetsResponse = serde_json::from_str(raw)?;
    let total = resp.arb_bets.len();
    let opps: Vec<_> = resp
        .arb_bets
        .into_iter()
        .filter_map(|bet| to_opportunity(bet, sport, found_at))
        .collect();
    if opps.len() < total {
        debug!("odds-api.io {sport}: kept {} of {total} upstream arbs", opps.len());
    }
    Ok(opps)
}

pub struct OddsApiIoAdapter {
    client:      reqwest::Client,
    settings:    OddsApiIoSettings,
    credentials: Arc<dyn CredentialLookup>,
}

impl OddsApiIoAdapter {
    pub fn new(client: reqwest::Client, settings: OddsApiIoSettings, credentials: Arc<dyn CredentialLookup>) -> Self {
        Self { client, settings, credentials }
    }

    async fn fetch_sport(&self, scheduler: &ProviderScheduler, sport: &str) -> Result<Vec<ArbitrageOpportunity>, CoreError> {
        let url = format!("{}/v1/arbitrage-bets", self.settings.base_url.trim_end_matches('/'));
        let sport_param = sport.to_string();
        let client = &self.client;
        let correlation_id = new_correlation_id();

        let body = scheduler
            .schedule_with_credential_as(ProviderId::OddsApiIo, self.credentials.as_ref(), "fetch_arbitrage_bets", &correlation_id, move |key| async move {
                fetch_text(client, &url, &[("sport", sport_param), ("apiKey", key)]).await
            })
            .await?;

        parse_arb_bets(&body, sport, &now_iso()).map_err(|e| malformed_payload(ProviderId::OddsApiIo, sport, &e, &correlation_id))
    }
}

#[async_trait]
impl OddsAdapter for OddsApiIoAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::OddsApiIo
    }

    async fn fetch_opportunities(&self, scheduler: &ProviderScheduler) -> Result<Vec<ArbitrageOpportunity>, CoreError> {
        let mut all = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for sport in &self.settings.sports {
            match self.fetch_sport(scheduler, sport).await {
                Ok(opps) => {
                    info!(sport = %sport, count = opps.len(), "odds-api.io arbs");
                    succeeded += 1;
                    all.extend(opps);
                }
                Err(e) if e.category == ErrorCategory::UserError => return Err(e),
                Err(e) => {
                    warn!(sport = %sport, code = %e.code, "odds-api.io fetch failed: {}", e.message);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(all),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
      "arb_bets": [
        {
          "id": "abc123",
          "home_team": "Arsenal FC",
          "away_team": "Chelsea",
          "commence_time": "2025-01-15T15:00:00Z",
          "league": "EPL",
          "market": "h2h",
          "roi": 0.25,
          "outcome_a": { "outcome": "Arsenal FC", "odds": 2.10, "bookmaker": "Pinnacle" },
          "outcome_b": { "outcome": "Chelsea", "odds": 2.05, "bookmaker": "Betfair" }
        },
        {
          "home_team": "Lakers",
          "away_team": "Celtics",
          "commence_time": "2025-01-16T01:00:00Z",
          "market": "totals",
          "roi": 0.04,
          "outcome_a": { "outcome": "Over 220.5", "odds": 1.5, "bookmaker": "A" },
          "outcome_b": { "outcome": "Under 220.5", "odds": 1.5, "bookmaker": "B" }
        },
        {
          "home_team": "X",
          "away_team": "Y",
          "market": "corners",
          "roi": 0.1,
          "outcome_a": { "outcome": "Over", "odds": 3.0, "bookmaker": "A" },
          "outcome_b": { "outcome": "Under", "odds": 3.0, "bookmaker": "B" }
        },
        {
          "home_team": "Real Madrid CF",
          "away_team": "Atlético Madrid",
          "commence_time": "2025-02-01T20:00:00Z",
          "roi": 0.0,
          "outcome_a": { "outcome": "Real Madrid CF", "odds": 2.2, "bookmaker": "A" },
          "outcome_b": { "outcome": "Atlético Madrid", "odds": 2.2, "bookmaker": "B" }
        }
      ]
    }"#;

    #[test]
    fn upstream_roi_is_recomputed() {
        let opps = parse_arb_bets(PAYLOAD, "soccer_epl", "2025-01-15T10:00:00Z").unwrap();
        let first = &opps[0];
        assert_eq!(first.id, "odds-api-io:abc123");
        assert!((first.roi - 0.036).abs() < 1e-3);
        assert_eq!(first.sport, "soccer");
        assert_eq!(first.event.league, "EPL");
        assert_eq!(first.provider_id, Some(ProviderId::OddsApiIo));
    }

    #[test]
    fn non_arbs_and_unknown_markets_are_dropped() {
        let opps = parse_arb_bets(PAYLOAD, "soccer_epl", "now").unwrap();
        // Lakers totals recompute to a loss; corners is not a known market
        assert_eq!(opps.len(), 2);
        assert!(opps.iter().all(|o| o.is_profitable()));
    }

    #[test]
    fn missing_id_is_derived_from_normalized_teams() {
        let opps = parse_arb_bets(PAYLOAD, "soccer_laliga", "now").unwrap();
        let derby = opps.iter().find(|o| o.event.name.starts_with("Real")).unwrap();
        assert_eq!(derby.id, "odds-api-io:real-madrid-atletico-madrid-2025-02-01T20-h2h");
        assert_eq!(derby.legs[0].market, MarketKey::H2h);
        assert_eq!(derby.event.league, "soccer_laliga");
    }

    #[test]
    fn empty_or_malformed_bodies() {
        assert!(parse_arb_bets("{}", "soccer_epl", "now").unwrap().is_empty());
        assert!(parse_arb_bets("not json", "soccer_epl", "now").is_err());
    }
}
