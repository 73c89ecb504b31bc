/// arbfeed-live — Provider Scheduler
/// The only road to upstream APIs: per-provider FIFO lanes with min-time spacing,
/// a refilling reservoir, quota status tracking, and the offline quota calibration harness.

pub mod adapter;
pub mod calibration;
pub mod config;
pub mod credentials;
pub mod scheduler;
pub mod status;

pub use adapter::OddsAdapter;
pub use calibration::{
    is_quota_safe, percentile, theoretical_requests_per_hour, CalibrationHarness, CalibrationOptions,
    CalibrationResult, CalibrationTarget, ProviderCalibrationSummary, StopReason,
};
pub use config::{hourly_quota, RateLimiterConfig};
pub use credentials::{CredentialLookup, EnvCredentials, StaticCredentials};
pub use scheduler::{LanePhase, ProviderScheduler, ProviderStats};
pub use status::{ProviderQuotaStatus, StatusClass};
