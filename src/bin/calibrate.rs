/// arbfeed-live — Quota Calibration
///
/// Polls each provider through the scheduler for a bounded time / number of
/// iterations, then checks that the configured limits stay inside the hourly quota.
///
/// Run:
///   cargo run --bin calibrate -- --max-iterations 5 --provider the-odds-api
///   cargo run --bin calibrate -- --dry-run --validate     (no requests, CI gate)

use anyhow::{bail, Context, Result};
use arb_detector::{CoreError, ProviderId};
use arbfeed_live::{AppConfig, FeedService};
use clap::Parser;
use dotenv::dotenv;
use logger::{now_iso, CalibrationEvent, EventLogger, StructuredLogger};
use price_monitor::build_adapters;
use provider_scheduler::{
    CalibrationHarness, CalibrationOptions, CalibrationResult, CalibrationTarget, EnvCredentials, ProviderScheduler,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "calibrate")]
#[command(version, about = "Check provider rate limits against their hourly quotas", long_about = None)]
struct Cli {
    /// Wall-clock budget per provider
    #[arg(long, default_value_t = 600)]
    duration_secs: u64,

    #[arg(long, default_value_t = 20)]
    max_iterations: u32,

    /// Extra pause between iterations
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Provider to calibrate (repeatable); defaults to every enabled provider
    #[arg(long = "provider", value_parser = parse_provider)]
    providers: Vec<ProviderId>,

    /// Exit nonzero unless every provider is quota-safe
    #[arg(long)]
    validate: bool,

    /// Evaluate configuration only, send no requests
    #[arg(long)]
    dry_run: bool,
}

fn parse_provider(raw: &str) -> Result<ProviderId, String> {
    raw.parse()
}

fn log_result(events: &EventLogger, result: &CalibrationResult) {
    for s in &result.providers {
        let ev = CalibrationEvent {
            ts:                now_iso(),
            event:             "CALIBRATION_RESULT",
            provider:          s.provider.to_string(),
            iterations:        s.iterations,
            p50_ms:            s.latency.p50_ms,
            p95_ms:            s.latency.p95_ms,
            requests_per_hour: s.theoretical_requests_per_hour,
            hourly_quota:      s.hourly_quota,
            quota_safe:        s.quota_safe,
        };
        if let Err(e) = events.log(&ev) {
            warn!("Calibration log write failed: {e}");
        }
        info!(
            provider = %s.provider,
            iterations = s.iterations,
            stopped_by = ?s.stopped_by,
            quota_safe = s.quota_safe,
            "{} req/h theoretical vs quota {}",
            s.theoretical_requests_per_hour, s.hourly_quota
        );
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

    let cli = Cli::parse();
    let config = AppConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let providers = if cli.providers.is_empty() {
        config.providers.enabled.clone()
    } else {
        cli.providers.clone()
    };
    let targets: Vec<CalibrationTarget> = providers
        .iter()
        .map(|&provider| CalibrationTarget { provider, hourly_quota: config.hourly_quota(provider) })
        .collect();

    let logger = StructuredLogger::with_jsonl(&config.log_dir);
    let scheduler = Arc::new(
        ProviderScheduler::new(config.rate_limits.clone(), logger.clone())
            .context("rate limiter configuration rejected")?,
    );
    let options = CalibrationOptions {
        duration:              Duration::from_secs(cli.duration_secs),
        max_iterations:        cli.max_iterations,
        inter_iteration_delay: Duration::from_millis(cli.delay_ms),
    };

    let result = if cli.dry_run {
        info!("Dry run: evaluating configuration only");
        CalibrationHarness::new(&scheduler, options).evaluate(&targets)
    } else {
        let mut settings = config.providers.clone();
        settings.enabled = providers.clone();
        let adapters = build_adapters(&settings, Arc::new(EnvCredentials));
        let service = FeedService::new(scheduler.clone(), adapters, logger)
            .context("adapter registration failed")?;
        let service = &service;

        CalibrationHarness::new(service.scheduler(), options)
            .run(&targets, |provider| async move {
                let snapshot = service.poll_provider_snapshot(provider).await;
                match snapshot.errors.into_iter().next() {
                    Some(failure) => Err::<usize, CoreError>(failure.error),
                    None => Ok(snapshot.opportunities.len()),
                }
            })
            .await
    };

    log_result(&EventLogger::new(&config.log_dir), &result);
    println!("{}", serde_json::to_string_pretty(&result)?);

    verdict(&result, cli.validate)
}

/// A failed calibration is always reported; with `--validate` it also fails the process.
fn verdict(result: &CalibrationResult, validate: bool) -> Result<()> {
    if result.overall_pass {
        info!("Calibration PASSED");
        return Ok(());
    }
    warn!("Calibration FAILED: at least one provider can exceed its hourly quota");
    if validate {
        bail!("quota calibration failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider_scheduler::RateLimiterConfig;

    fn result_for(min_time_ms: u64, hourly_quota: u32) -> CalibrationResult {
        let scheduler = ProviderScheduler::new(
            [(ProviderId::OddsApiIo, RateLimiterConfig { min_time_ms, reservoir: 10, reservoir_refresh_interval_ms: 3_600_000 })],
            StructuredLogger::tracing_only(),
        )
        .unwrap();
        CalibrationHarness::new(&scheduler, CalibrationOptions::default())
            .evaluate(&[CalibrationTarget { provider: ProviderId::OddsApiIo, hourly_quota }])
    }

    #[test]
    fn validate_turns_a_failed_calibration_into_an_error() {
        // 1 s spacing allows 3600 req/h against a quota of 100
        let failed = result_for(1_000, 100);
        assert!(!failed.overall_pass);
        assert!(verdict(&failed, true).is_err());
        assert!(verdict(&failed, false).is_ok());
    }

    #[test]
    fn passing_calibration_is_ok_either_way() {
        let passed = result_for(36_000, 100);
        assert!(passed.overall_pass);
        assert!(verdict(&passed, true).is_ok());
        assert!(verdict(&passed, false).is_ok());
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from([
            "calibrate", "--dry-run", "--validate", "--provider", "odds-api-io", "--provider", "the-odds-api",
        ])
        .unwrap();
        assert!(cli.dry_run && cli.validate);
        assert_eq!(cli.providers, vec![ProviderId::OddsApiIo, ProviderId::TheOddsApi]);
        assert_eq!(cli.max_iterations, 20);
        assert!(Cli::try_parse_from(["calibrate", "--provider", "pinnacle"]).is_err());
    }
}
