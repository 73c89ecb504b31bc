//! the-odds-api.com — bookmaker odds per event, arbitrage computed locally
//!
//! GET {base}/v4/sports/{sport}/odds/?regions=eu&markets=h2h,spreads,totals&oddsFormat=decimal&apiKey=…
//! Response: [ { id, sport_key, sport_title, commence_time, home_team, away_team,
//!               bookmakers: [ { key, title, markets: [ { key, outcomes: [ { name, price, point? } ] } ] } ] } ]

use arb_detector::{ArbitrageOpportunity, CoreError, ErrorCategory, EventInfo, Leg, MarketKey, ProviderId};
use async_trait::async_trait;
use logger::{new_correlation_id, now_iso};
use provider_scheduler::{CredentialLookup, OddsAdapter, ProviderScheduler};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::http::{fetch_text, malformed_payload};
use crate::TheOddsApiSettings;

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OddsEvent {
    id:            String,
    sport_key:     String,
    sport_title:   Option<String>,
    commence_time: String,
    home_team:     String,
    away_team:     String,
    #[serde(default)]
    bookmakers:    Vec<OddsBookmaker>,
}

#[derive(Debug, Deserialize)]
struct OddsBookmaker {
    key:     String,
    title:   Option<String>,
    #[serde(default)]
    markets: Vec<OddsMarket>,
}

#[derive(Debug, Deserialize)]
struct OddsMarket {
    key:      String,
    #[serde(default)]
    outcomes: Vec<OddsOutcome>,
}

#[derive(Debug, Deserialize)]
struct OddsOutcome {
    name:  String,
    price: f64,
    point: Option<f64>,
}

// ── Best-price selection ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct BestPrice {
    bookmaker: String,
    odds:      f64,
    point:     Option<f64>,
}

/// Market plus line. Spreads are keyed by the home side's signed handicap, so
/// `home -4.5 / away +4.5` and `home +4.5 / away -4.5` are separate lines.
fn line_key(market: MarketKey, point: Option<f64>, outcome: &str, home_team: &str) -> Option<String> {
    match (market, point) {
        (MarketKey::Spreads, Some(p)) => {
            let home_point = if outcome == home_team { p } else { -p };
            Some(format!("{:+.2}", home_point))
        }
        (MarketKey::Totals, Some(p)) => Some(format!("{:.2}", p)),
        _ => None,
    }
}

fn outcome_label(name: &str, point: Option<f64>) -> String {
    match point {
        Some(p) => format!("{name} {p:+}"),
        None => name.to_string(),
    }
}

fn opportunities_for_event(ev: &OddsEvent, found_at: &str) -> Vec<ArbitrageOpportunity> {
    // (market, line) → outcome label → best price
    let mut books: BTreeMap<(&'static str, Option<String>), (MarketKey, BTreeMap<String, BestPrice>)> =
        BTreeMap::new();

    for bm in &ev.bookmakers {
        let bookmaker = bm.title.clone().unwrap_or_else(|| bm.key.clone());
        for market in &bm.markets {
            let Some(key) = MarketKey::from_upstream(&market.key) else { continue };
            for o in &market.outcomes {
                if !o.price.is_finite() || o.price <= 1.0 {
                    continue;
                }
                let slot = books
                    .entry((key.as_str(), line_key(key, o.point, &o.name, &ev.home_team)))
                    .or_insert_with(|| (key, BTreeMap::new()));
                let label = outcome_label(&o.name, o.point);
                let better = slot.1.get(&label).map_or(true, |b| o.price > b.odds);
                if better {
                    slot.1.insert(label, BestPrice { bookmaker: bookmaker.clone(), odds: o.price, point: o.point });
                }
            }
        }
    }

    let event = EventInfo {
        name:   format!("{} vs {}", ev.home_team, ev.away_team),
        date:   ev.commence_time.clone(),
        league: ev.sport_title.clone().unwrap_or_else(|| ev.sport_key.clone()),
    };
    let sport = ev.sport_key.split('_').next().unwrap_or(&ev.sport_key).to_string();

    let mut out = Vec::new();
    for ((_, line), (market, best)) in books {
        // three-way markets (draw) are not two-leg arbitrage
        if best.len() != 2 {
            continue;
        }
        let mut sides: Vec<(String, BestPrice)> = best.into_iter().collect();
        if market == MarketKey::Spreads {
            let (a, b) = (sides[0].1.point, sides[1].1.point);
            if !matches!((a, b), (Some(a), Some(b)) if (a + b).abs() < 1e-9) {
                continue;
            }
        }
        if market == MarketKey::H2h {
            sides.sort_by_key(|(label, _)| *label != ev.home_team);
        }

        let mut legs = sides.into_iter().map(|(outcome, p)| Leg {
            bookmaker: p.bookmaker,
            market,
            odds: p.odds,
            outcome,
        });
        let (Some(a), Some(b)) = (legs.next(), legs.next()) else { continue };

        let id = match &line {
            Some(l) => format!("the-odds-api:{}:{}:{}", ev.id, market, l),
            None    => format!("the-odds-api:{}:{}", ev.id, market),
        };
        if let Some(opp) = ArbitrageOpportunity::from_legs(
            id,
            sport.clone(),
            event.clone(),
            [a, b],
            found_at,
            Some(ProviderId::TheOddsApi),
        ) {
            out.push(opp);
        }
    }
    out
}

/// Parse one `/odds` response into arbitrage opportunities (ROI > 0 only).
pub fn parse_events(raw: &str, found_at: &str) -> Result<Vec<ArbitrageOpportunity>, serde_json::Error> {
    let events: Vec<OddsEvent> = serde_json::from_str(raw)?;
    debug!("the-odds-api: {} events in payload", events.len());
    Ok(events.iter().flat_map(|ev| opportunities_for_event(ev, found_at)).collect())
}

// ── Adapter ──────────────────────────────────────────────────────────────────

pub struct TheOddsApiAdapter {
    client:      reqwest::Client,
    settings:    TheOddsApiSettings,
    credentials: Arc<dyn CredentialLookup>,
}

impl TheOddsApiAdapter {
    pub fn new(client: reqwest::Client, settings: TheOddsApiSettings, credentials: Arc<dyn CredentialLookup>) -> Self {
        Self { client, settings, credentials }
    }

    async fn fetch_sport(&self, scheduler: &ProviderScheduler, sport: &str) -> Result<Vec<ArbitrageOpportunity>, CoreError> {
        let url = format!("{}/v4/sports/{}/odds/", self.settings.base_url.trim_end_matches('/'), sport);
        let regions = self.settings.regions.clone();
        let client = &self.client;
        let correlation_id = new_correlation_id();

        let body = scheduler
            .schedule_with_credential_as(ProviderId::TheOddsApi, self.credentials.as_ref(), "fetch_odds", &correlation_id, move |key| async move {
                let query = [
                    ("apiKey", key),
                    ("regions", regions),
                    ("markets", "h2h,spreads,totals".to_string()),
                    ("oddsFormat", "decimal".to_string()),
                ];
                fetch_text(client, &url, &query).await
            })
            .await?;

        parse_events(&body, &now_iso()).map_err(|e| malformed_payload(ProviderId::TheOddsApi, sport, &e, &correlation_id))
    }
}

#[async_trait]
impl OddsAdapter for TheOddsApiAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::TheOddsApi
    }

    async fn fetch_opportunities(&self, scheduler: &ProviderScheduler) -> Result<Vec<ArbitrageOpportunity>, CoreError> {
        let mut all = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for sport in &self.settings.sports {
            match self.fetch_sport(scheduler, sport).await {
                Ok(opps) => {
                    info!(sport = %sport, count = opps.len(), "the-odds-api arbs");
                    succeeded += 1;
                    all.extend(opps);
                }
                // no key: every other sport would fail the same way
                Err(e) if e.category == ErrorCategory::UserError => return Err(e),
                Err(e) => {
                    warn!(sport = %sport, code = %e.code, "the-odds-api fetch failed: {}", e.message);
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
