//! Per-provider rate limits and hourly quotas.

use arb_detector::{CoreError, ProviderId};
use serde::Serialize;
use std::env;
use std::time::Duration;

pub const MS_PER_HOUR: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterConfig {
    /// Minimum spacing between request starts.
    pub min_time_ms:                   u64,
    /// Requests allowed per refill window.
    pub reservoir:                     u32,
    pub reservoir_refresh_interval_ms: u64,
}

impl RateLimiterConfig {
    /// Built-in defaults, sized for the free tiers.
    pub fn for_provider(provider: ProviderId) -> Self {
        match provider {
            // 500 req/month free tier → one poll per minute at most
            ProviderId::TheOddsApi => Self {
                min_time_ms:                   60_000,
                reservoir:                     50,
                reservoir_refresh_interval_ms: MS_PER_HOUR,
            },
            // odds-api.io free tier: 100 req/hour
            ProviderId::OddsApiIo => Self {
                min_time_ms:                   36_000,
                reservoir:                     100,
                reservoir_refresh_interval_ms: MS_PER_HOUR,
            },
        }
    }

    /// Defaults overridden by `<PREFIX>_MIN_TIME_MS`, `<PREFIX>_RESERVOIR`,
    /// `<PREFIX>_RESERVOIR_REFRESH_MS`.
    pub fn from_env(provider: ProviderId) -> Self {
        let base = Self::for_provider(provider);
        let prefix = provider.env_prefix();
        Self {
            min_time_ms: env_parse(&format!("{prefix}_MIN_TIME_MS")).unwrap_or(base.min_time_ms),
            reservoir: env_parse(&format!("{prefix}_RESERVOIR")).unwrap_or(base.reservoir),
            reservoir_refresh_interval_ms: env_parse(&format!("{prefix}_RESERVOIR_REFRESH_MS"))
                .unwrap_or(base.reservoir_refresh_interval_ms),
        }
    }

    pub fn min_time(&self) -> Duration {
        Duration::from_millis(self.min_time_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.reservoir_refresh_interval_ms)
    }

    pub fn validate(&self, provider: ProviderId) -> Result<(), CoreError> {
        if self.reservoir == 0 {
            return Err(CoreError::user(
                "INVALID_RATE_LIMIT",
                format!("{provider}: reservoir must be at least 1"),
                "config",
            ));
        }
        if self.reservoir_refresh_interval_ms == 0 {
            return Err(CoreError::user(
                "INVALID_RATE_LIMIT",
                format!("{provider}: reservoir refresh interval must be positive"),
                "config",
            ));
        }
        Ok(())
    }
}

/// Hourly call ceiling of the provider's API tier, overridable via `<PREFIX>_HOURLY_QUOTA`.
pub fn hourly_quota(provider: ProviderId) -> u32 {
    let default = match provider {
        ProviderId::TheOddsApi => 60,
        ProviderId::OddsApiIo  => 100,
    };
    env_parse(&format!("{}_HOURLY_QUOTA", provider.env_prefix())).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_within_quota() {
        for p in ProviderId::ALL {
            let cfg = RateLimiterConfig::for_provider(p);
            assert!(cfg.validate(p).is_ok());
            assert!(MS_PER_HOUR / cfg.min_time_ms <= u64::from(hourly_quota(p)));
            assert!(cfg.reservoir <= hourly_quota(p));
        }
    }

    #[test]
    fn zero_reservoir_is_rejected() {
        let cfg = RateLimiterConfig { min_time_ms: 10, reservoir: 0, reservoir_refresh_interval_ms: 1000 };
        let err = cfg.validate(ProviderId::OddsApiIo).unwrap_err();
        assert_eq!(err.code, "INVALID_RATE_LIMIT");
    }
}
