use std::collections::HashSet;

use crate::model::ArbitrageOpportunity;

/// Flatten per-provider lists and keep the first opportunity seen for each `id`.
///
/// Identity-level only: opportunities with different ids for the same fixture
/// are both kept, and `merged_from` is left exactly as produced. ROI and legs
/// pass through untouched, so merging an already merged list is a no-op.
pub fn merge_provider_opportunities<I>(per_provider: I) -> Vec<ArbitrageOpportunity>
where
    I: IntoIterator<Item = Vec<ArbitrageOpportunity>>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for opp in per_provider.into_iter().flatten() {
        if seen.insert(opp.id.clone()) {
            merged.push(opp);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventInfo, Leg, MarketKey, ProviderId};

    fn opp(id: &str, provider: ProviderId, odds_a: f64) -> ArbitrageOpportunity {
        let legs = [
            Leg { bookmaker: "b1".into(), market: MarketKey::H2h, odds: odds_a, outcome: "home".into() },
            Leg { bookmaker: "b2".into(), market: MarketKey::H2h, odds: 2.2, outcome: "away".into() },
        ];
        let event = EventInfo {
            name:   "Arsenal vs Chelsea".into(),
            date:   "2025-01-15T15:00:00Z".into(),
            league: "EPL".into(),
        };
        ArbitrageOpportunity::from_legs(id, "soccer", event, legs, "2025-01-15T10:00:00Z", Some(provider))
            .unwrap()
    }

    #[test]
    fn duplicate_ids_collapse_to_first_seen() {
        let a = vec![opp("1", ProviderId::TheOddsApi, 2.1), opp("2", ProviderId::TheOddsApi, 2.3)];
        let b = vec![opp("2", ProviderId::OddsApiIo, 2.5), opp("3", ProviderId::OddsApiIo, 2.4)];

        let merged = merge_provider_opportunities(vec![a, b]);
        let ids: Vec<&str> = merged.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(merged[1].provider_id, Some(ProviderId::TheOddsApi));
        assert_eq!(merged[1].legs[0].odds, 2.3);
    }

    #[test]
    fn merge_is_idempotent() {
        let input = vec![
            vec![opp("1", ProviderId::TheOddsApi, 2.1), opp("1", ProviderId::TheOddsApi, 2.2)],
            vec![opp("4", ProviderId::OddsApiIo, 2.5), opp("1", ProviderId::OddsApiIo, 2.4)],
        ];
        let once = merge_provider_opportunities(input);
        let twice = merge_provider_opportunities(vec![once.clone()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn same_fixture_with_different_ids_is_not_collapsed() {
        let merged = merge_provider_opportunities(vec![
            vec![opp("toa-1", ProviderId::TheOddsApi, 2.1)],
            vec![opp("oai-9", ProviderId::OddsApiIo, 2.1)],
        ]);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|o| o.merged_from.is_none()));
    }

    #[test]
    fn empty_input() {
        assert!(merge_provider_opportunities(Vec::<Vec<ArbitrageOpportunity>>::new()).is_empty());
    }
}
