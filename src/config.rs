use arb_detector::ProviderId;
use price_monitor::ProviderSettings;
use provider_scheduler::{hourly_quota, RateLimiterConfig};
use std::env;
use std::path::PathBuf;

/// Everything the binaries read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_dir:            PathBuf,
    pub poll_interval_secs: u64,
    pub providers:          ProviderSettings,
    pub rate_limits:        Vec<(ProviderId, RateLimiterConfig)>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let log_dir = env::var("LOG_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs"));

        let poll_interval_secs = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let providers = ProviderSettings::from_env()?;
        let rate_limits = ProviderId::ALL
            .into_iter()
            .map(|p| (p, RateLimiterConfig::from_env(p)))
            .collect();

        Ok(Self { log_dir, poll_interval_secs, providers, rate_limits })
    }

    pub fn hourly_quota(&self, provider: ProviderId) -> u32 {
        hourly_quota(provider)
    }
}
