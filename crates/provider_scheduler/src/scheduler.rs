//! Per-provider request scheduler.
//!
//! Every upstream call goes through a [`ProviderLane`]: a FIFO admission gate
//! (tokio's `Mutex` hands the lock out in request order), a reservoir of
//! credits refilled every `reservoir_refresh_interval_ms`, and a `governor`
//! limiter that keeps request starts `min_time_ms` apart. The gate is held
//! until the call settles, so a provider never has two requests in flight.
//!
//! Quota status and counters live inside the lane and change only in
//! [`ProviderScheduler::schedule_provider_request`]; everyone else reads them.

use arb_detector::{CoreError, ProviderId, UpstreamFailure};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use logger::{new_correlation_id, LogFields, StructuredLogger};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::adapter::OddsAdapter;
use crate::config::RateLimiterConfig;
use crate::credentials::CredentialLookup;
use crate::status::{ProviderQuotaStatus, StatusClass};

const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LanePhase {
    Idle,
    /// Waiting for admission, a reservoir credit or spacing.
    Scheduled,
    InFlight,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub requests:            u64,
    pub successes:           u64,
    pub rate_limited:        u64,
    pub client_errors:       u64,
    pub server_errors:       u64,
    pub other_errors:        u64,
    /// Rejected before admission; these never touch the reservoir.
    pub credential_failures: u64,
    pub last_latency_ms:     Option<u64>,
    pub recent_latencies_ms: VecDeque<u64>,
}

impl ProviderStats {
    fn record(&mut self, class: StatusClass, latency: Duration) {
        self.requests += 1;
        match class {
            StatusClass::Success     => self.successes += 1,
            StatusClass::RateLimited => self.rate_limited += 1,
            StatusClass::ClientError => self.client_errors += 1,
            StatusClass::ServerError => self.server_errors += 1,
            StatusClass::Other       => self.other_errors += 1,
        }
        let ms = latency.as_millis() as u64;
        self.last_latency_ms = Some(ms);
        self.recent_latencies_ms.push_back(ms);
        while self.recent_latencies_ms.len() > MAX_LATENCY_SAMPLES {
            self.recent_latencies_ms.pop_front();
        }
    }
}

// ── Reservoir ────────────────────────────────────────────────────────────────

struct Reservoir {
    remaining:    u32,
    window_start: Instant,
}

impl Reservoir {
    fn new(config: &RateLimiterConfig) -> Self {
        Self { remaining: config.reservoir, window_start: Instant::now() }
    }

    /// Take one credit, sleeping until the next refill when the window is spent.
    async fn take(&mut self, config: &RateLimiterConfig, provider: ProviderId) {
        let interval = config.refresh_interval();
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(self.window_start);
            if elapsed >= interval {
                // stay aligned to the refill timer
                let windows = (elapsed.as_millis() / interval.as_millis()) as u32;
                self.window_start += interval * windows;
                self.remaining = config.reservoir;
            }
            if self.remaining > 0 {
                self.remaining -= 1;
                return;
            }
            let refill_at = self.window_start + interval;
            debug!(provider = %provider, wait_ms = refill_at.duration_since(now).as_millis() as u64,
                "reservoir empty, waiting for refill");
            sleep_until(refill_at).await;
        }
    }
}

// ── Lane ─────────────────────────────────────────────────────────────────────

struct ProviderLane {
    config:    RateLimiterConfig,
    gate:      Mutex<Reservoir>,
    spacing:   Option<DefaultDirectRateLimiter>,
    status:    watch::Sender<ProviderQuotaStatus>,
    stats:     StdMutex<ProviderStats>,
    queued:    AtomicUsize,
    in_flight: AtomicBool,
}

impl ProviderLane {
    fn new(config: RateLimiterConfig) -> Self {
        let spacing = Quota::with_period(config.min_time()).map(RateLimiter::direct);
        let (status, _) = watch::channel(ProviderQuotaStatus::Ok);
        Self {
            gate: Mutex::new(Reservoir::new(&config)),
            config,
            spacing,
            status,
            stats: StdMutex::new(ProviderStats::default()),
            queued: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, ProviderStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decrements the queue counter even when the waiting future is dropped.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

pub struct ProviderScheduler {
    lanes:    HashMap<ProviderId, ProviderLane>,
    bindings: StdMutex<BTreeSet<ProviderId>>,
    logger:   StructuredLogger,
}

impl ProviderScheduler {
    pub fn new(
        configs: impl IntoIterator<Item = (ProviderId, RateLimiterConfig)>,
        logger:  StructuredLogger,
    ) -> Result<Self, CoreError> {
        let mut lanes = HashMap::new();
        for (provider, config) in configs {
            config.validate(provider)?;
            lanes.insert(provider, ProviderLane::new(config));
        }
        Ok(Self { lanes, bindings: StdMutex::new(BTreeSet::new()), logger })
    }

    /// Lanes for every known provider with limits from the environment.
    pub fn from_env(logger: StructuredLogger) -> Result<Self, CoreError> {
        Self::new(
            ProviderId::ALL.into_iter().map(|p| (p, RateLimiterConfig::from_env(p))),
            logger,
        )
    }

    fn lane(&self, provider: ProviderId, correlation_id: &str) -> Result<&ProviderLane, CoreError> {
        self.lanes.get(&provider).ok_or_else(|| {
            CoreError::system(
                "PROVIDER_NOT_CONFIGURED",
                format!("no rate limiter configured for {provider}"),
                correlation_id,
            )
        })
    }

    /// Bind adapters to their lanes. Re-registering a provider is a no-op;
    /// returns how many providers were newly bound.
    pub fn register_adapters(&self, adapters: &[Arc<dyn OddsAdapter>]) -> Result<usize, CoreError> {
        for adapter in adapters {
            let provider = adapter.provider_id();
            if !adapter.routes_through_scheduler() {
                return Err(CoreError::system(
                    "ADAPTER_BYPASSES_SCHEDULER",
                    format!("adapter for {provider} does not route requests through the scheduler"),
                    "register",
                ));
            }
            self.lane(provider, "register")?;
        }

        let mut bindings = self.bindings.lock().unwrap_or_else(|e| e.into_inner());
        let mut added = 0;
        for adapter in adapters {
            let provider = adapter.provider_id();
            if bindings.insert(provider) {
                info!(provider = %provider, "adapter bound to scheduler");
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn registered_providers(&self) -> Vec<ProviderId> {
        self.bindings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    pub fn get_rate_limiter_config(&self, provider: ProviderId) -> Option<RateLimiterConfig> {
        self.lanes.get(&provider).map(|l| l.config)
    }

    pub fn get_provider_quota_status(&self, provider: ProviderId) -> Option<ProviderQuotaStatus> {
        self.lanes.get(&provider).map(|l| *l.status.borrow())
    }

    /// Change feed for one provider's quota status.
    pub fn subscribe_status(&self, provider: ProviderId) -> Option<watch::Receiver<ProviderQuotaStatus>> {
        self.lanes.get(&provider).map(|l| l.status.subscribe())
    }

    pub fn provider_stats(&self, provider: ProviderId) -> Option<ProviderStats> {
        self.lanes.get(&provider).map(|l| l.stats().clone())
    }

    pub fn provider_phase(&self, provider: ProviderId) -> Option<LanePhase> {
        self.lanes.get(&provider).map(|l| {
            if l.in_flight.load(Ordering::SeqCst) {
                LanePhase::InFlight
            } else if l.queued.load(Ordering::SeqCst) > 0 {
                LanePhase::Scheduled
            } else {
                LanePhase::Idle
            }
        })
    }

    /// Wait for admission, run `thunk`, record the outcome.
    ///
    /// No retries: a 429 only moves the quota status, the caller decides what
    /// to do next.
    pub async fn schedule_provider_request<T, F, Fut>(
        &self,
        provider:  ProviderId,
        operation: &str,
        thunk:     F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let correlation_id = new_correlation_id();
        self.run_scheduled(provider, operation, &correlation_id, thunk).await
    }

    /// Like [`Self::schedule_provider_request`], but resolves the API key first.
    /// A missing key fails fast with `CREDENTIAL_MISSING` without touching the lane.
    pub async fn schedule_with_credential<T, F, Fut>(
        &self,
        provider:    ProviderId,
        credentials: &dyn CredentialLookup,
        operation:   &str,
        thunk:       F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        self.schedule_with_credential_as(provider, credentials, operation, &new_correlation_id(), thunk)
            .await
    }

    /// [`Self::schedule_with_credential`] under a caller-chosen correlation id, so
    /// work done on the response (parsing) logs under the same id as the request.
    pub async fn schedule_with_credential_as<T, F, Fut>(
        &self,
        provider:       ProviderId,
        credentials:    &dyn CredentialLookup,
        operation:      &str,
        correlation_id: &str,
        thunk:          F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let lane = self.lane(provider, correlation_id)?;

        let Some(api_key) = credentials.api_key_for(provider) else {
            lane.stats().credential_failures += 1;
            let err = CoreError::user(
                "CREDENTIAL_MISSING",
                format!("no API key configured for {provider}"),
                correlation_id,
            )
            .with_details(serde_json::json!({ "provider": provider.as_str() }));
            self.logger.emit(
                "provider_request_rejected",
                LogFields::new("scheduler", operation)
                    .provider(provider.as_str())
                    .correlation(correlation_id)
                    .error_category(err.category.as_str())
                    .with("code", &err.code),
            );
            return Err(err);
        };

        self.run_scheduled(provider, operation, correlation_id, move || thunk(api_key)).await
    }

    async fn run_scheduled<T, F, Fut>(
        &self,
        provider:       ProviderId,
        operation:      &str,
        correlation_id: &str,
        thunk:          F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let lane = self.lane(provider, correlation_id)?;

        lane.queued.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedGuard(&lane.queued);
        let mut reservoir = lane.gate.lock().await;
        reservoir.take(&lane.config, provider).await;
        if let Some(limiter) = &lane.spacing {
            limiter.until_ready().await;
        }
        drop(queued);

        lane.in_flight.store(true, Ordering::SeqCst);
        let in_flight = InFlightGuard(&lane.in_flight);
        let started = Instant::now();
        let outcome = thunk().await;
        let latency = started.elapsed();
        drop(in_flight);

        let class = match &outcome {
            Ok(_) => StatusClass::Success,
            Err(f) => f.http_status().map_or(StatusClass::Other, StatusClass::from_http),
        };
        lane.stats().record(class, latency);
        self.observe_status(provider, lane, class, correlation_id);
        drop(reservoir);

        let fields = LogFields::new("scheduler", operation)
            .provider(provider.as_str())
            .correlation(correlation_id)
            .duration_ms(latency.as_millis() as u64)
            .with("statusClass", class.as_str());

        match outcome {
            Ok(value) => {
                self.logger.emit("provider_request", fields);
                Ok(value)
            }
            Err(failure) => {
                let err = failure.into_core_error(provider.as_str(), correlation_id);
                self.logger.emit(
                    "provider_request",
                    fields
                        .error_category(err.category.as_str())
                        .with("code", &err.code)
                        .with("message", &err.message),
                );
                Err(err)
            }
        }
    }

    fn observe_status(&self, provider: ProviderId, lane: &ProviderLane, class: StatusClass, correlation_id: &str) {
        let mut previous = ProviderQuotaStatus::Ok;
        let mut next = ProviderQuotaStatus::Ok;
        let changed = lane.status.send_if_modified(|current| {
            previous = *current;
            next = current.after(class);
            if next != *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if !changed {
            return;
        }

        if next == ProviderQuotaStatus::Ok {
            info!(provider = %provider, from = %previous, "provider recovered");
        } else {
            warn!(provider = %provider, from = %previous, to = %next, "provider quota status changed");
        }
        self.logger.emit(
            "provider_status_changed",
            LogFields::new("scheduler", "observe_status")
                .provider(provider.as_str())
                .correlation(correlation_id)
                .with("from", previous)
                .with("to", next),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use arb_detector::{ArbitrageOpportunity, ErrorCategory};
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicU32;

    fn scheduler_with(config: RateLimiterConfig) -> ProviderScheduler {
        ProviderScheduler::new([(ProviderId::TheOddsApi, config)], StructuredLogger::tracing_only()).unwrap()
    }

    fn cfg(min_time_ms: u64, reservoir: u32, refresh_ms: u64) -> RateLimiterConfig {
        RateLimiterConfig { min_time_ms, reservoir, reservoir_refresh_interval_ms: refresh_ms }
    }

    #[tokio::test]
    async fn requests_start_at_least_min_time_apart_in_fifo_order() {
        let scheduler = scheduler_with(cfg(200, 10, 3_600_000));
        let starts: StdMutex<Vec<(usize, Instant)>> = StdMutex::new(Vec::new());

        let calls = (0..3).map(|i| {
            let starts = &starts;
            scheduler.schedule_provider_request(ProviderId::TheOddsApi, "test", move || async move {
                starts.lock().unwrap().push((i, Instant::now()));
                Ok::<_, UpstreamFailure>(i)
            })
        });
        let results = join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let starts = starts.into_inner().unwrap();
        let order: Vec<usize> = starts.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, [0, 1, 2]);
        for pair in starts.windows(2) {
            let gap = pair[1].1.duration_since(pair[0].1);
            // governor runs on its own clock; allow a few ms of skew
            assert!(gap >= Duration::from_millis(195), "gap was {gap:?}");
        }
    }

    #[tokio::test]
    async fn never_two_requests_in_flight() {
        let scheduler = scheduler_with(cfg(0, 100, 3_600_000));
        let active = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        let calls = (0..5).map(|_| {
            let (active, max_seen) = (&active, &max_seen);
            scheduler.schedule_provider_request(ProviderId::TheOddsApi, "test", move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, UpstreamFailure>(())
            })
        });
        join_all(calls).await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.provider_phase(ProviderId::TheOddsApi), Some(LanePhase::Idle));
        assert_eq!(scheduler.provider_stats(ProviderId::TheOddsApi).unwrap().requests, 5);
    }

    #[tokio::test]
    async fn empty_reservoir_waits_for_refill() {
        let t0 = Instant::now();
        let scheduler = scheduler_with(cfg(0, 2, 300));
        let mut starts = Vec::new();
        for _ in 0..3 {
            let started = scheduler
                .schedule_provider_request(ProviderId::TheOddsApi, "test", || async {
                    Ok::<_, UpstreamFailure>(Instant::now())
                })
                .await
                .unwrap();
            starts.push(started);
        }
        assert!(starts[1].duration_since(t0) < Duration::from_millis(300));
        assert!(starts[2].duration_since(t0) >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn missing_credential_fails_fast_without_using_capacity() {
        let scheduler = scheduler_with(cfg(0, 1, 3_600_000));
        let called = AtomicU32::new(0);

        let err = scheduler
            .schedule_with_credential(ProviderId::TheOddsApi, &StaticCredentials::new(), "test", |_key| async {
                called.fetch_add(1, Ordering::SeqCst);
                Ok::<_, UpstreamFailure>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::UserError);
        assert_eq!(err.code, "CREDENTIAL_MISSING");
        assert_eq!(called.load(Ordering::SeqCst), 0);

        // the single reservoir credit is still there
        let creds = StaticCredentials::new().with_key(ProviderId::TheOddsApi, "k");
        let key = tokio::time::timeout(
            Duration::from_secs(1),
            scheduler.schedule_with_credential(ProviderId::TheOddsApi, &creds, "test", |key| async move {
                Ok::<_, UpstreamFailure>(key)
            }),
        )
        .await
        .expect("request should be admitted immediately")
        .unwrap();
        assert_eq!(key, "k");

        let stats = scheduler.provider_stats(ProviderId::TheOddsApi).unwrap();
        assert_eq!(stats.credential_failures, 1);
        assert_eq!(stats.requests, 1);
    }

    #[derive(Default)]
    struct CapturingSink {
        seen: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    impl logger::LogSink for CapturingSink {
        fn emit(&self, event: &str, fields: &serde_json::Value) {
            self.seen.lock().unwrap().push((event.to_string(), fields.clone()));
        }
    }

    #[tokio::test]
    async fn caller_correlation_id_runs_through_request_and_error() {
        let sink = Arc::new(CapturingSink::default());
        let scheduler = ProviderScheduler::new(
            [(ProviderId::TheOddsApi, cfg(0, 5, 3_600_000))],
            StructuredLogger::new(vec![sink.clone() as Arc<dyn logger::LogSink>]),
        )
        .unwrap();
        let creds = StaticCredentials::new().with_key(ProviderId::TheOddsApi, "k");

        let err = scheduler
            .schedule_with_credential_as(ProviderId::TheOddsApi, &creds, "fetch_odds", "req-7", |_key| async {
                Err::<(), _>(UpstreamFailure::Http { status: 502, body: String::new() })
            })
            .await
            .unwrap_err();
        assert_eq!(err.correlation_id, "req-7");

        let seen = sink.seen.lock().unwrap();
        let request = seen.iter().find(|(event, _)| event == "provider_request").unwrap();
        assert_eq!(request.1["correlationId"], "req-7");
        assert!(seen.iter().all(|(_, fields)| fields["correlationId"] == "req-7"));
    }

    #[tokio::test]
    async fn quota_status_follows_responses() {
        let scheduler = scheduler_with(cfg(0, 100, 3_600_000));
        let mut rx = scheduler.subscribe_status(ProviderId::TheOddsApi).unwrap();
        let p = ProviderId::TheOddsApi;

        let fail = |status: u16| {
            scheduler.schedule_provider_request(p, "test", move || async move {
                Err::<(), _>(UpstreamFailure::Http { status, body: String::new() })
            })
        };

        let err = fail(429).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::ProviderError);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ProviderQuotaStatus::Throttled);

        fail(429).await.unwrap_err();
        assert_eq!(scheduler.get_provider_quota_status(p), Some(ProviderQuotaStatus::QuotaLimited));

        fail(503).await.unwrap_err();
        assert_eq!(scheduler.get_provider_quota_status(p), Some(ProviderQuotaStatus::Down));

        fail(404).await.unwrap_err();
        assert_eq!(scheduler.get_provider_quota_status(p), Some(ProviderQuotaStatus::Down));

        scheduler
            .schedule_provider_request(p, "test", || async { Ok::<_, UpstreamFailure>(()) })
            .await
            .unwrap();
        assert_eq!(scheduler.get_provider_quota_status(p), Some(ProviderQuotaStatus::Ok));

        let stats = scheduler.provider_stats(p).unwrap();
        assert_eq!((stats.rate_limited, stats.server_errors, stats.client_errors, stats.successes), (2, 1, 1, 1));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_a_system_error() {
        let scheduler = scheduler_with(cfg(0, 1, 1000));
        let err = scheduler
            .schedule_provider_request(ProviderId::OddsApiIo, "test", || async { Ok::<_, UpstreamFailure>(()) })
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::SystemError);
        assert_eq!(err.code, "PROVIDER_NOT_CONFIGURED");
        assert!(scheduler.get_rate_limiter_config(ProviderId::OddsApiIo).is_none());
        assert_eq!(scheduler.get_rate_limiter_config(ProviderId::TheOddsApi), Some(cfg(0, 1, 1000)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = ProviderScheduler::new([(ProviderId::TheOddsApi, cfg(10, 0, 1000))], StructuredLogger::tracing_only());
        assert!(result.is_err());
    }

    struct StubAdapter {
        provider:  ProviderId,
        compliant: bool,
    }

    #[async_trait]
    impl OddsAdapter for StubAdapter {
        fn provider_id(&self) -> ProviderId {
            self.provider
        }

        fn routes_through_scheduler(&self) -> bool {
            self.compliant
        }

        async fn fetch_opportunities(&self, _: &ProviderScheduler) -> Result<Vec<ArbitrageOpportunity>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn register_adapters_is_idempotent_and_checks_compliance() {
        let scheduler = scheduler_with(cfg(0, 1, 1000));
        let good: Vec<Arc<dyn OddsAdapter>> =
            vec![Arc::new(StubAdapter { provider: ProviderId::TheOddsApi, compliant: true })];

        assert_eq!(scheduler.register_adapters(&good).unwrap(), 1);
        assert_eq!(scheduler.register_adapters(&good).unwrap(), 0);
        assert_eq!(scheduler.registered_providers(), [ProviderId::TheOddsApi]);

        let rogue: Vec<Arc<dyn OddsAdapter>> =
            vec![Arc::new(StubAdapter { provider: ProviderId::TheOddsApi, compliant: false })];
        let err = scheduler.register_adapters(&rogue).unwrap_err();
        assert_eq!(err.code, "ADAPTER_BYPASSES_SCHEDULER");

        let unknown: Vec<Arc<dyn OddsAdapter>> =
            vec![Arc::new(StubAdapter { provider: ProviderId::OddsApiIo, compliant: true })];
        assert!(scheduler.register_adapters(&unknown).is_err());
    }
}
