//! Canonical opportunity and quote types shared by every provider.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::roi::compute_two_leg_roi;

// ── Providers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    TheOddsApi,
    OddsApiIo,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::TheOddsApi, ProviderId::OddsApiIo];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::TheOddsApi => "the-odds-api",
            ProviderId::OddsApiIo  => "odds-api-io",
        }
    }

    /// Prefix used for this provider's environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderId::TheOddsApi => "THE_ODDS_API",
            ProviderId::OddsApiIo  => "ODDS_API_IO",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}

// ── Markets ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKey {
    #[serde(rename = "h2h")]
    H2h,
    #[serde(rename = "btts")]
    BothTeamsToScore,
    #[serde(rename = "spreads")]
    Spreads,
    #[serde(rename = "totals")]
    Totals,
}

impl MarketKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKey::H2h              => "h2h",
            MarketKey::BothTeamsToScore => "btts",
            MarketKey::Spreads          => "spreads",
            MarketKey::Totals           => "totals",
        }
    }

    /// Map an upstream market label onto a canonical key.
    pub fn from_upstream(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "h2h" | "moneyline" | "match_winner" | "1x2" => Some(MarketKey::H2h),
            "btts" | "both_teams_to_score"               => Some(MarketKey::BothTeamsToScore),
            "spreads" | "spread" | "handicap"            => Some(MarketKey::Spreads),
            "totals" | "total" | "over_under"            => Some(MarketKey::Totals),
            _ => None,
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Opportunities ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub bookmaker: String,
    pub market:    MarketKey,
    pub odds:      f64,
    pub outcome:   String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub name:   String,
    /// ISO-8601 start time
    pub date:   String,
    pub league: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    /// Unique within the producing source only.
    pub id:          String,
    pub sport:       String,
    pub event:       EventInfo,
    pub legs:        [Leg; 2],
    pub roi:         f64,
    pub found_at:    String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<Vec<ProviderId>>,
}

impl ArbitrageOpportunity {
    /// Build an opportunity with ROI computed from the legs.
    /// Returns `None` unless the pair is a real arbitrage (ROI > 0).
    pub fn from_legs(
        id:          impl Into<String>,
        sport:       impl Into<String>,
        event:       EventInfo,
        legs:        [Leg; 2],
        found_at:    impl Into<String>,
        provider_id: Option<ProviderId>,
    ) -> Option<Self> {
        let roi = compute_two_leg_roi(legs[0].odds, legs[1].odds);
        if roi <= 0.0 {
            return None;
        }
        Some(Self {
            id: id.into(),
            sport: sport.into(),
            event,
            legs,
            roi,
            found_at: found_at.into(),
            provider_id,
            merged_from: None,
        })
    }

    /// Overwrite `roi` with the value implied by the legs.
    pub fn recompute_roi(&mut self) {
        self.roi = compute_two_leg_roi(self.legs[0].odds, self.legs[1].odds);
    }

    pub fn is_profitable(&self) -> bool {
        self.roi > 0.0
    }
}

// ── Quotes ───────────────────────────────────────────────────────────────────

/// Origin tag of a quote; `Unknown` when the opportunity carried no provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum QuoteProvider {
    Known(ProviderId),
    Unknown,
}

impl From<Option<ProviderId>> for QuoteProvider {
    fn from(p: Option<ProviderId>) -> Self {
        p.map_or(QuoteProvider::Unknown, QuoteProvider::Known)
    }
}

impl fmt::Display for QuoteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteProvider::Known(p) => f.write_str(p.as_str()),
            QuoteProvider::Unknown  => f.write_str("unknown"),
        }
    }
}

/// Fixture fingerprint: `home|away|YYYY-MM-DDTHH`, team names sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventKey(pub(crate) String);

impl EventKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One leg of one opportunity, tagged with its fixture key. Lives for one matching pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketQuote {
    pub event_key:           EventKey,
    pub provider:            QuoteProvider,
    pub bookmaker:           String,
    pub market:              MarketKey,
    pub outcome:             String,
    pub odds:                f64,
    pub original_event_name: String,
    pub original_event_date: String,
    pub original_league:     String,
    pub found_at:            String,
}
