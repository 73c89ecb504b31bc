//! Quota-safety calibration.
//!
//! Drives repeated scheduled polls per provider for a bounded time or number
//! of iterations, collects latency and error statistics, and checks that the
//! configured limits can't exceed the provider's hourly quota.

use arb_detector::{CoreError, ProviderId};
use futures_util::future::join_all;
use logger::now_iso;
use serde::Serialize;
use std::future::Future;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{RateLimiterConfig, MS_PER_HOUR};
use crate::scheduler::ProviderScheduler;
use crate::status::{ProviderQuotaStatus, StatusClass};

#[derive(Debug, Clone, Copy)]
pub struct CalibrationOptions {
    /// Wall-clock budget per provider.
    pub duration:              Duration,
    pub max_iterations:        u32,
    /// Pause between iterations, on top of whatever the scheduler imposes.
    pub inter_iteration_delay: Duration,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            duration:              Duration::from_secs(600),
            max_iterations:        20,
            inter_iteration_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationTarget {
    pub provider:     ProviderId,
    pub hourly_quota: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Deadline,
    IterationCap,
    /// Quota check only, nothing was polled.
    NotRun,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms:  f64,
    pub p95_ms:  f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub success:      u32,
    pub rate_limited: u32,
    pub client_error: u32,
    pub server_error: u32,
    pub other:        u32,
}

impl OutcomeCounts {
    fn record(&mut self, class: StatusClass) {
        match class {
            StatusClass::Success     => self.success += 1,
            StatusClass::RateLimited => self.rate_limited += 1,
            StatusClass::ClientError => self.client_error += 1,
            StatusClass::ServerError => self.server_error += 1,
            StatusClass::Other       => self.other += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCalibrationSummary {
    pub provider:                      ProviderId,
    pub config:                        Option<RateLimiterConfig>,
    pub hourly_quota:                  u32,
    pub iterations:                    u32,
    pub outcomes:                      OutcomeCounts,
    /// Quota status transitions seen during the run.
    pub backoff_events:                u32,
    pub final_status:                  Option<ProviderQuotaStatus>,
    pub latency:                       LatencySummary,
    pub theoretical_requests_per_hour: u64,
    pub quota_safe:                    bool,
    pub stopped_by:                    StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:                         Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResult {
    pub started_at:   String,
    pub ended_at:     String,
    pub providers:    Vec<ProviderCalibrationSummary>,
    pub overall_pass: bool,
}

// ── Math ─────────────────────────────────────────────────────────────────────

/// Percentile of an ascending slice, interpolating linearly between ranks.
/// `p` is a fraction in `[0, 1]`. Empty input gives 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

pub fn summarize_latencies(samples_ms: &[f64]) -> LatencySummary {
    if samples_ms.is_empty() {
        return LatencySummary::default();
    }
    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    LatencySummary {
        samples: sorted.len(),
        mean_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
        p50_ms:  percentile(&sorted, 0.50),
        p95_ms:  percentile(&sorted, 0.95),
    }
}

/// `floor(3_600_000 / min_time)`; a zero spacing is unbounded.
pub fn theoretical_requests_per_hour(min_time_ms: u64) -> u64 {
    if min_time_ms == 0 {
        u64::MAX
    } else {
        MS_PER_HOUR / min_time_ms
    }
}

pub fn is_quota_safe(config: &RateLimiterConfig, hourly_quota: u32) -> bool {
    theoretical_requests_per_hour(config.min_time_ms) <= u64::from(hourly_quota)
        && config.reservoir <= hourly_quota
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct CalibrationHarness<'a> {
    scheduler: &'a ProviderScheduler,
    options:   CalibrationOptions,
}

impl<'a> CalibrationHarness<'a> {
    pub fn new(scheduler: &'a ProviderScheduler, options: CalibrationOptions) -> Self {
        Self { scheduler, options }
    }

    /// Poll every target concurrently. `poll` must go through the scheduler;
    /// its `Ok` value (item count) is only logged.
    pub async fn run<F, Fut>(&self, targets: &[CalibrationTarget], poll: F) -> CalibrationResult
    where
        F: Fn(ProviderId) -> Fut,
        Fut: Future<Output = Result<usize, CoreError>>,
    {
        let started_at = now_iso();
        let providers = join_all(targets.iter().map(|t| self.calibrate_provider(*t, &poll))).await;
        Self::finish(started_at, providers)
    }

    /// Quota verdict from configuration alone.
    pub fn evaluate(&self, targets: &[CalibrationTarget]) -> CalibrationResult {
        let started_at = now_iso();
        let providers = targets
            .iter()
            .map(|t| self.summary(*t, 0, OutcomeCounts::default(), 0, &[], StopReason::NotRun))
            .collect();
        Self::finish(started_at, providers)
    }

    fn finish(started_at: String, providers: Vec<ProviderCalibrationSummary>) -> CalibrationResult {
        let overall_pass = !providers.is_empty() && providers.iter().all(|s| s.quota_safe);
        CalibrationResult { started_at, ended_at: now_iso(), providers, overall_pass }
    }

    async fn calibrate_provider<F, Fut>(&self, target: CalibrationTarget, poll: &F) -> ProviderCalibrationSummary
    where
        F: Fn(ProviderId) -> Fut,
        Fut: Future<Output = Result<usize, CoreError>>,
    {
        let provider = target.provider;
        if self.scheduler.get_rate_limiter_config(provider).is_none() {
            return self.summary(target, 0, OutcomeCounts::default(), 0, &[], StopReason::NotRun);
        }

        let deadline = Instant::now() + self.options.duration;
        let mut last_status = self.scheduler.get_provider_quota_status(provider);
        let mut iterations = 0u32;
        let mut outcomes = OutcomeCounts::default();
        let mut backoff_events = 0u32;
        let mut latencies = Vec::new();

        info!(provider = %provider, max_iterations = self.options.max_iterations,
            duration_secs = self.options.duration.as_secs(), "calibration started");

        let stopped_by = loop {
            if iterations >= self.options.max_iterations {
                break StopReason::IterationCap;
            }
            if Instant::now() >= deadline {
                break StopReason::Deadline;
            }

            let started = Instant::now();
            let result = poll(provider).await;
            latencies.push(started.elapsed().as_secs_f64() * 1000.0);
            outcomes.record(StatusClass::from_result(&result));
            iterations += 1;

            match &result {
                Ok(items) => debug!(provider = %provider, iteration = iterations, items, "calibration poll ok"),
                Err(e) => warn!(provider = %provider, iteration = iterations, code = %e.code, "calibration poll failed"),
            }

            let status = self.scheduler.get_provider_quota_status(provider);
            if status != last_status {
                backoff_events += 1;
                info!(provider = %provider, from = ?last_status, to = ?status, "backoff event");
                last_status = status;
            }

            if !self.options.inter_iteration_delay.is_zero() {
                sleep(self.options.inter_iteration_delay).await;
            }
        };

        self.summary(target, iterations, outcomes, backoff_events, &latencies, stopped_by)
    }

    fn summary(
        &self,
        target:         CalibrationTarget,
        iterations:     u32,
        outcomes:       OutcomeCounts,
        backoff_events: u32,
        latencies:      &[f64],
        stopped_by:     StopReason,
    ) -> ProviderCalibrationSummary {
        let config = self.scheduler.get_rate_limiter_config(target.provider);
        let (theoretical, quota_safe, error) = match &config {
            Some(c) => (
                theoretical_requests_per_hour(c.min_time_ms),
                is_quota_safe(c, target.hourly_quota),
                None,
            ),
            None => (0, false, Some(format!("no rate limiter configured for {}", target.provider))),
        };
        ProviderCalibrationSummary {
            provider: target.provider,
            config,
            hourly_quota: target.hourly_quota,
            iterations,
            outcomes,
            backoff_events,
            final_status: self.scheduler.get_provider_quota_status(target.provider),
            latency: summarize_latencies(latencies),
            theoretical_requests_per_hour: theoretical,
            quota_safe,
            stopped_by,
            error,
        }
    }
}
