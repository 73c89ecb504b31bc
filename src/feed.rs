//! One poll-and-merge cycle over every registered adapter.

use arb_detector::{
    cross_provider_fixtures, group_by_event_key, merge_provider_opportunities, ArbitrageOpportunity, CoreError,
    ProviderId,
};
use futures_util::future::join_all;
use logger::{now_iso, FeedCycleEvent, LogFields, StructuredLogger};
use provider_scheduler::{OddsAdapter, ProviderQuotaStatus, ProviderScheduler};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider_id: ProviderId,
    pub error:       CoreError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub opportunities:           Vec<ArbitrageOpportunity>,
    pub fetched_at:              String,
    /// Set when the snapshot was taken for a single provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id:             Option<ProviderId>,
    pub status:                  BTreeMap<ProviderId, ProviderQuotaStatus>,
    pub errors:                  Vec<ProviderFailure>,
    /// Fixtures seen from two or more providers this cycle; observation only.
    pub cross_provider_fixtures: usize,
}

impl FeedSnapshot {
    /// Worst quota status across the polled providers.
    pub fn worst_status(&self) -> Option<ProviderQuotaStatus> {
        self.status.values().copied().max_by_key(|s| s.severity())
    }
}

pub struct FeedService {
    scheduler: Arc<ProviderScheduler>,
    adapters:  Vec<Arc<dyn OddsAdapter>>,
    logger:    StructuredLogger,
}

impl FeedService {
    /// Binds `adapters` to `scheduler`; fails if one of them bypasses it or
    /// has no lane.
    pub fn new(
        scheduler: Arc<ProviderScheduler>,
        adapters:  Vec<Arc<dyn OddsAdapter>>,
        logger:    StructuredLogger,
    ) -> Result<Self, CoreError> {
        scheduler.register_adapters(&adapters)?;
        Ok(Self { scheduler, adapters, logger })
    }

    pub fn scheduler(&self) -> &ProviderScheduler {
        &self.scheduler
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.adapters.iter().map(|a| a.provider_id()).collect()
    }

    pub async fn poll_and_get_feed_snapshot(&self) -> FeedSnapshot {
        self.poll(None).await
    }

    /// Same cycle restricted to one provider.
    pub async fn poll_provider_snapshot(&self, provider: ProviderId) -> FeedSnapshot {
        self.poll(Some(provider)).await
    }

    async fn poll(&self, only: Option<ProviderId>) -> FeedSnapshot {
        let started = Instant::now();
        let adapters: Vec<&Arc<dyn OddsAdapter>> = self
            .adapters
            .iter()
            .filter(|a| only.map_or(true, |p| a.provider_id() == p))
            .collect();

        let results = join_all(adapters.iter().map(|a| async move {
            (a.provider_id(), a.fetch_opportunities(&self.scheduler).await)
        }))
        .await;

        let mut per_provider = Vec::new();
        let mut errors = Vec::new();
        for (provider_id, result) in results {
            match result {
                Ok(opps) => {
                    let total = opps.len();
                    // adapter-reported ROI is never trusted
                    let kept: Vec<_> = opps
                        .into_iter()
                        .map(|mut o| {
                            o.recompute_roi();
                            o
                        })
                        .filter(|o| o.is_profitable())
                        .collect();
                    if kept.len() < total {
                        warn!(provider = %provider_id, dropped = total - kept.len(), "non-positive ROI dropped");
                    }
                    per_provider.push(kept);
                }
                Err(error) => {
                    warn!(provider = %provider_id, "{error}");
                    self.logger.emit(
                        "provider_poll_failed",
                        LogFields::new("feed", "poll_and_get_feed_snapshot")
                            .provider(provider_id.as_str())
                            .correlation(&error.correlation_id)
                            .error_category(error.category.as_str())
                            .with("code", &error.code),
                    );
                    errors.push(ProviderFailure { provider_id, error });
                }
            }
        }

        let opportunities = merge_provider_opportunities(per_provider);
        let fixtures = cross_provider_fixtures(&group_by_event_key(&opportunities));
        for (key, providers) in &fixtures {
            let names: Vec<String> = providers.iter().map(ToString::to_string).collect();
            info!(fixture = %key, providers = ?names, "fixture reported by several providers");
        }

        let status = adapters
            .iter()
            .filter_map(|a| {
                let p = a.provider_id();
                self.scheduler.get_provider_quota_status(p).map(|s| (p, s))
            })
            .collect();

        let duration_ms = started.elapsed().as_millis() as u64;
        self.logger.emit_value(
            "feed_cycle",
            serde_json::to_value(FeedCycleEvent {
                ts:                      now_iso(),
                event:                   "FEED_CYCLE",
                opportunities:           opportunities.len(),
                provider_errors:         errors.len(),
                cross_provider_fixtures: fixtures.len(),
                duration_ms,
            })
            .unwrap_or_default(),
        );

        FeedSnapshot {
            opportunities,
            fetched_at: now_iso(),
            provider_id: only,
            status,
            errors,
            cross_provider_fixtures: fixtures.len(),
        }
    }
}
