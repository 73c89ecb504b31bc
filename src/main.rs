/// arbfeed-live — Feed Poller
///
/// What it does:
///   1. Every POLL_INTERVAL_SECS polls every enabled odds provider through the scheduler
///   2. Recomputes ROI, merges per-provider lists by id, notes fixtures seen by several providers
///   3. Writes every opportunity (with balanced stakes for 100 units) to logs/YYYY-MM-DD.jsonl
///
/// What it does NOT do: place bets, retry on 429 (the scheduler only records the status)
///
/// Run:
///   cargo run --bin feed-poller

use anyhow::{Context, Result};
use arb_detector::{balanced_stakes, ArbitrageOpportunity};
use arbfeed_live::{AppConfig, FeedService, FeedSnapshot};
use dotenv::dotenv;
use logger::{now_iso, EventLogger, OpportunityEvent, StructuredLogger};
use price_monitor::build_adapters;
use provider_scheduler::{EnvCredentials, ProviderScheduler};
use std::env;
use std::fs::File;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const STAKE_UNITS: f64 = 100.0;

fn opportunity_event(opp: &ArbitrageOpportunity) -> OpportunityEvent {
    let [a, b] = &opp.legs;
    let stakes = balanced_stakes(STAKE_UNITS, a.odds, b.odds);
    OpportunityEvent {
        ts:             now_iso(),
        event:          "ARB_OPPORTUNITY",
        id:             opp.id.clone(),
        provider:       opp.provider_id.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()),
        sport:          opp.sport.clone(),
        event_name:     opp.event.name.clone(),
        event_date:     opp.event.date.clone(),
        roi_pct:        opp.roi * 100.0,
        outcome_a:      a.outcome.clone(),
        outcome_a_odds: a.odds,
        bookmaker_a:    a.bookmaker.clone(),
        stake_a:        stakes.map(|(s, _)| s),
        outcome_b:      b.outcome.clone(),
        outcome_b_odds: b.odds,
        bookmaker_b:    b.bookmaker.clone(),
        stake_b:        stakes.map(|(_, s)| s),
    }
}

fn record_snapshot(events: &EventLogger, snapshot: &FeedSnapshot) {
    for opp in &snapshot.opportunities {
        info!(
            provider = ?opp.provider_id,
            roi = format!("{:.2}%", opp.roi * 100.0),
            "{} [{}] — ARB",
            opp.event.name, opp.legs[0].market
        );
        if let Err(e) = events.log(&opportunity_event(opp)) {
            warn!("Opportunity log write failed: {e}");
        }
    }
    for failure in &snapshot.errors {
        warn!(provider = %failure.provider_id, code = %failure.error.code, "provider skipped this cycle");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let config = AppConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    info!("=== arbfeed-live feed poller ===");
    info!("Mode: OBSERVE ONLY (no bets)");
    info!("Providers: {:?}", config.providers.enabled);
    info!("Logs: {}", config.log_dir.display());

    // Single instance lock
    let lock_file_path = env::temp_dir().join("arbfeed_live_poller.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another instance of feed-poller is already running! Exiting.");
            return Ok(());
        }
    };

    let logger = StructuredLogger::with_jsonl(&config.log_dir);
    let scheduler = Arc::new(
        ProviderScheduler::new(config.rate_limits.clone(), logger.clone())
            .context("rate limiter configuration rejected")?,
    );
    let adapters = build_adapters(&config.providers, Arc::new(EnvCredentials));
    let service = FeedService::new(scheduler, adapters, logger)
        .context("adapter registration failed")?;
    let events = EventLogger::new(&config.log_dir);

    info!("Poll interval: {}s", config.poll_interval_secs);

    loop {
        info!("--- Feed poll cycle ---");
        let snapshot = service.poll_and_get_feed_snapshot().await;
        record_snapshot(&events, &snapshot);
        info!(
            opportunities = snapshot.opportunities.len(),
            errors = snapshot.errors.len(),
            cross_provider = snapshot.cross_provider_fixtures,
            status = ?snapshot.worst_status(),
            "cycle done"
        );

        sleep(Duration::from_secs(config.poll_interval_secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_detector::{EventInfo, Leg, MarketKey, ProviderId};

    #[test]
    fn opportunity_event_carries_balanced_stakes() {
        let legs = [
            Leg { bookmaker: "Bet365".into(), market: MarketKey::H2h, odds: 2.10, outcome: "Arsenal".into() },
            Leg { bookmaker: "Unibet".into(), market: MarketKey::H2h, odds: 2.05, outcome: "Chelsea".into() },
        ];
        let event = EventInfo { name: "Arsenal vs Chelsea".into(), date: "2025-01-15T15:00:00Z".into(), league: "EPL".into() };
        let opp = ArbitrageOpportunity::from_legs("x", "soccer", event, legs, "now", Some(ProviderId::TheOddsApi))
            .unwrap();

        let ev = opportunity_event(&opp);
        let (a, b) = (ev.stake_a.unwrap(), ev.stake_b.unwrap());
        assert!((a + b - STAKE_UNITS).abs() < 1e-9);
        assert!((a * 2.10 - b * 2.05).abs() < 1e-9);
        assert_eq!(ev.provider, "the-odds-api");
        assert!((ev.roi_pct - 3.6).abs() < 0.1);
    }
}
