//! Two-leg arbitrage math on decimal odds. Total functions: bad input gives 0 / None.

fn usable(odds: f64) -> bool {
    odds.is_finite() && odds > 0.0
}

/// Guaranteed profit fraction of a balanced two-leg stake.
///
/// `roi = 1 - (1/a + 1/b)`, clamped to 0. NaN, infinite or non-positive odds
/// give exactly 0. Works for any two complementary outcomes (home/away,
/// yes/no, spread sides), since only the odds are looked at.
pub fn compute_two_leg_roi(odds_a: f64, odds_b: f64) -> f64 {
    if !usable(odds_a) || !usable(odds_b) {
        return 0.0;
    }
    let roi = 1.0 - (1.0 / odds_a + 1.0 / odds_b);
    if roi.is_finite() && roi > 0.0 { roi } else { 0.0 }
}

pub fn is_arbitrage(roi: f64) -> bool {
    roi > 0.0
}

pub fn implied_probability(odds: f64) -> Option<f64> {
    usable(odds).then(|| 1.0 / odds)
}

/// Split `total_stake` so both legs pay out the same amount.
pub fn balanced_stakes(total_stake: f64, odds_a: f64, odds_b: f64) -> Option<(f64, f64)> {
    if !total_stake.is_finite() || total_stake <= 0.0 {
        return None;
    }
    let pa = implied_probability(odds_a)?;
    let pb = implied_probability(odds_b)?;
    let stake_a = total_stake * pa / (pa + pb);
    Some((stake_a, total_stake - stake_a))
}
