//! Cross-provider fixture identity.
//!
//! Team names are normalized with string heuristics only, so two differently
//! worded reports of the same real fixture ("Man Utd" vs "Manchester United")
//! may fail to match. Every function here returns `None` / empty instead of
//! failing, so one malformed record never aborts a batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::{ArbitrageOpportunity, EventInfo, EventKey, MarketQuote, QuoteProvider};

const TEAM_PREFIXES: [&str; 3] = ["fc ", "ac ", "sc "];

/// Tried longest-first so " afc" wins over " fc".
const TEAM_SUFFIXES: [&str; 7] = [
    " football club",
    " soccer club",
    " afc",
    " fc",
    " sc",
    " cf",
    " ac",
];

const TEAM_SEPARATORS: [&str; 4] = [" vs ", " v ", " - ", " @ "];

pub fn normalize_team_name(raw: &str) -> String {
    let folded: String = raw
        .trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    let mut name = folded.trim();

    if let Some(rest) = TEAM_PREFIXES.iter().find_map(|p| name.strip_prefix(p)) {
        name = rest;
    }
    if let Some(rest) = TEAM_SUFFIXES.iter().find_map(|s| name.strip_suffix(s)) {
        name = rest;
    }

    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split "Home vs Away" on the first separator that gives exactly two non-empty sides.
pub fn extract_teams(event_name: &str) -> Option<(String, String)> {
    TEAM_SEPARATORS.iter().find_map(|sep| {
        let parts: Vec<&str> = event_name.split(sep).map(str::trim).collect();
        match parts.as_slice() {
            [home, away] if !home.is_empty() && !away.is_empty() => {
                Some((home.to_string(), away.to_string()))
            }
            _ => None,
        }
    })
}

fn parse_utc(date: &str) -> Option<DateTime<Utc>> {
    let date = date.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(date, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `YYYY-MM-DDTHH` in UTC.
pub fn truncate_to_hour(date: &str) -> Option<String> {
    parse_utc(date).map(|dt| dt.format("%Y-%m-%dT%H").to_string())
}

pub fn build_event_key(event: &EventInfo) -> Option<EventKey> {
    let (home, away) = extract_teams(&event.name)?;
    let home = normalize_team_name(&home);
    let away = normalize_team_name(&away);
    if home.is_empty() || away.is_empty() {
        return None;
    }
    let hour = truncate_to_hour(&event.date)?;

    let (first, second) = if home <= away { (home, away) } else { (away, home) };
    Some(EventKey(format!("{first}|{second}|{hour}")))
}

/// One quote per usable leg; nothing when the fixture can't be keyed.
pub fn extract_quotes(opportunity: &ArbitrageOpportunity) -> Vec<MarketQuote> {
    let Some(event_key) = build_event_key(&opportunity.event) else {
        return Vec::new();
    };
    let provider = QuoteProvider::from(opportunity.provider_id);

    opportunity
        .legs
        .iter()
        .filter(|leg| leg.odds.is_finite() && leg.odds > 0.0)
        .filter(|leg| !leg.bookmaker.trim().is_empty())
        .map(|leg| MarketQuote {
            event_key:           event_key.clone(),
            provider,
            bookmaker:           leg.bookmaker.clone(),
            market:              leg.market,
            outcome:             leg.outcome.clone(),
            odds:                leg.odds,
            original_event_name: opportunity.event.name.clone(),
            original_event_date: opportunity.event.date.clone(),
            original_league:     opportunity.event.league.clone(),
            found_at:            opportunity.found_at.clone(),
        })
        .collect()
}

/// Group opportunities by fixture key; unkeyable ones are skipped.
pub fn group_by_event_key(
    opportunities: &[ArbitrageOpportunity],
) -> BTreeMap<EventKey, Vec<ArbitrageOpportunity>> {
    let mut groups: BTreeMap<EventKey, Vec<ArbitrageOpportunity>> = BTreeMap::new();
    for opp in opportunities {
        if let Some(key) = build_event_key(&opp.event) {
            groups.entry(key).or_default().push(opp.clone());
        }
    }
    groups
}

pub fn group_quotes_by_event_key(quotes: Vec<MarketQuote>) -> BTreeMap<EventKey, Vec<MarketQuote>> {
    let mut groups: BTreeMap<EventKey, Vec<MarketQuote>> = BTreeMap::new();
    for q in quotes {
        groups.entry(q.event_key.clone()).or_default().push(q);
    }
    groups
}

/// Fixtures reported by two or more distinct providers.
pub fn cross_provider_fixtures(
    groups: &BTreeMap<EventKey, Vec<ArbitrageOpportunity>>,
) -> Vec<(EventKey, BTreeSet<QuoteProvider>)> {
    groups
        .iter()
        .filter_map(|(key, opps)| {
            let providers: BTreeSet<QuoteProvider> = opps
                .iter()
                .map(|o| QuoteProvider::from(o.provider_id))
                .collect();
            (providers.len() >= 2).then(|| (key.clone(), providers))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Leg, MarketKey, ProviderId};

    fn event(name: &str, date: &str) -> EventInfo {
        EventInfo { name: name.into(), date: date.into(), league: "EPL".into() }
    }

    fn opp(id: &str, name: &str, date: &str, provider: Option<ProviderId>) -> ArbitrageOpportunity {
        let legs = [
            Leg { bookmaker: "bet365".into(), market: MarketKey::H2h, odds: 2.10, outcome: "home".into() },
            Leg { bookmaker: "unibet".into(), market: MarketKey::H2h, odds: 2.05, outcome: "away".into() },
        ];
        ArbitrageOpportunity::from_legs(id, "soccer", event(name, date), legs, "2025-01-15T10:00:00Z", provider)
            .unwrap()
    }

    #[test]
    fn normalizes_club_tokens_and_accents() {
        assert_eq!(normalize_team_name("Arsenal FC"), "arsenal");
        assert_eq!(normalize_team_name("FC Barcelona"), "barcelona");
        assert_eq!(normalize_team_name("Atlético Madrid"), "atletico madrid");
        assert_eq!(normalize_team_name("  Bournemouth   AFC "), "bournemouth");
        assert_eq!(normalize_team_name("Chelsea Football Club"), "chelsea");
        assert_eq!(normalize_team_name("Real  Madrid CF"), "real madrid");
    }

    #[test]
    fn strips_only_one_prefix_and_one_suffix() {
        assert_eq!(normalize_team_name("FC AC Milan"), "ac milan");
        assert_eq!(normalize_team_name("Foo SC FC"), "foo sc");
        assert_eq!(normalize_team_name("FC Utrecht FC"), "utrecht");
    }

    #[test]
    fn no_abbreviation_expansion() {
        assert_ne!(normalize_team_name("Man Utd"), normalize_team_name("Manchester United"));
    }

    #[test]
    fn extracts_teams_with_separator_preference() {
        assert_eq!(extract_teams("Arsenal vs Chelsea"), Some(("Arsenal".into(), "Chelsea".into())));
        assert_eq!(extract_teams("Lakers @ Celtics"), Some(("Lakers".into(), "Celtics".into())));
        assert_eq!(
            extract_teams("Saint-Etienne v Paris - SG"),
            Some(("Saint-Etienne".into(), "Paris - SG".into()))
        );
        assert_eq!(extract_teams("A - B - C"), None);
        assert_eq!(extract_teams("Arsenal vs "), None);
        assert_eq!(extract_teams("Arsenal"), None);
    }

    #[test]
    fn truncates_to_utc_hour() {
        assert_eq!(truncate_to_hour("2025-01-15T15:59:59Z").as_deref(), Some("2025-01-15T15"));
        assert_eq!(truncate_to_hour("2025-01-15T17:30:00+02:00").as_deref(), Some("2025-01-15T15"));
        assert_eq!(truncate_to_hour("2025-01-15T15:30:00").as_deref(), Some("2025-01-15T15"));
        assert_eq!(truncate_to_hour("2025-01-15").as_deref(), Some("2025-01-15T00"));
        assert_eq!(truncate_to_hour("next tuesday"), None);
        assert_eq!(truncate_to_hour(""), None);
    }

    #[test]
    fn event_key_is_order_independent() {
        let a = build_event_key(&event("Arsenal vs Chelsea", "2025-01-15T15:00:00Z")).unwrap();
        let b = build_event_key(&event("Chelsea vs Arsenal", "2025-01-15T15:30:00Z")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "arsenal|chelsea|2025-01-15T15");
    }

    #[test]
    fn event_key_requires_every_component() {
        assert!(build_event_key(&event("Arsenal", "2025-01-15T15:00:00Z")).is_none());
        assert!(build_event_key(&event("Arsenal vs Chelsea", "soon")).is_none());
        assert!(build_event_key(&event("FC vs Chelsea", "2025-01-15T15:00:00Z")).is_some());
    }

    #[test]
    fn quotes_carry_key_and_provider_marker() {
        let o = opp("x", "Arsenal FC vs Chelsea", "2025-01-15T15:00:00Z", None);
        let quotes = extract_quotes(&o);
        assert_eq!(quotes.len(), 2);
        assert!(quotes.iter().all(|q| q.event_key.as_str() == "arsenal|chelsea|2025-01-15T15"));
        assert!(quotes.iter().all(|q| q.provider == QuoteProvider::Unknown));
        assert_eq!(quotes[0].original_event_name, "Arsenal FC vs Chelsea");
    }

    #[test]
    fn quotes_filter_bad_legs_and_unkeyable_events() {
        let mut o = opp("x", "Arsenal vs Chelsea", "2025-01-15T15:00:00Z", Some(ProviderId::OddsApiIo));
        o.legs[1].bookmaker = " ".into();
        assert_eq!(extract_quotes(&o).len(), 1);
        o.legs[0].odds = f64::NAN;
        assert!(extract_quotes(&o).is_empty());

        let unkeyable = opp("y", "Arsenal", "2025-01-15T15:00:00Z", None);
        assert!(extract_quotes(&unkeyable).is_empty());
    }

    #[test]
    fn groups_same_fixture_across_providers() {
        let opps = vec![
            opp("a", "Arsenal vs Chelsea", "2025-01-15T15:00:00Z", Some(ProviderId::TheOddsApi)),
            opp("b", "Chelsea FC v Arsenal", "2025-01-15T15:45:00Z", Some(ProviderId::OddsApiIo)),
            opp("c", "Everton vs Fulham", "2025-01-15T15:00:00Z", Some(ProviderId::OddsApiIo)),
            opp("d", "no separator here", "2025-01-15T15:00:00Z", None),
        ];
        let groups = group_by_event_key(&opps);
        assert_eq!(groups.len(), 2);

        let cross = cross_provider_fixtures(&groups);
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].0.as_str(), "arsenal|chelsea|2025-01-15T15");
        assert_eq!(cross[0].1.len(), 2);
    }

    #[test]
    fn quote_grouping_follows_event_keys() {
        let quotes: Vec<MarketQuote> = [
            opp("a", "Arsenal vs Chelsea", "2025-01-15T15:00:00Z", Some(ProviderId::TheOddsApi)),
            opp("b", "Everton vs Fulham", "2025-01-15T15:00:00Z", Some(ProviderId::OddsApiIo)),
        ]
        .iter()
        .flat_map(extract_quotes)
        .collect();
        let grouped = group_quotes_by_event_key(quotes);
        assert_eq!(grouped.len(), 2);
        assert!(grouped.values().all(|qs| qs.len() == 2));
    }
}
