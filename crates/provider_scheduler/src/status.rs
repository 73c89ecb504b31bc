use arb_detector::CoreError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProviderQuotaStatus {
    Ok,
    /// One 429 seen; caller should back off.
    Throttled,
    /// Repeated 429s; the quota is used up for now.
    QuotaLimited,
    /// Upstream answering 5xx.
    Down,
}

impl fmt::Display for ProviderQuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderQuotaStatus::Ok           => "ok",
            ProviderQuotaStatus::Throttled    => "throttled",
            ProviderQuotaStatus::QuotaLimited => "quota_limited",
            ProviderQuotaStatus::Down         => "down",
        };
        f.write_str(s)
    }
}

impl ProviderQuotaStatus {
    /// Higher is worse; used to summarize several providers.
    pub fn severity(&self) -> u8 {
        match self {
            ProviderQuotaStatus::Ok           => 0,
            ProviderQuotaStatus::Throttled    => 1,
            ProviderQuotaStatus::QuotaLimited => 2,
            ProviderQuotaStatus::Down         => 3,
        }
    }

    /// Next status after observing one response of class `class`.
    pub fn after(self, class: StatusClass) -> Self {
        match class {
            StatusClass::Success => ProviderQuotaStatus::Ok,
            StatusClass::RateLimited => match self {
                ProviderQuotaStatus::Throttled | ProviderQuotaStatus::QuotaLimited => {
                    ProviderQuotaStatus::QuotaLimited
                }
                _ => ProviderQuotaStatus::Throttled,
            },
            StatusClass::ServerError => ProviderQuotaStatus::Down,
            StatusClass::ClientError | StatusClass::Other => self,
        }
    }
}

/// Outcome class of one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusClass {
    Success,
    RateLimited,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            429       => StatusClass::RateLimited,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _         => StatusClass::Other,
        }
    }

    pub fn from_result<T>(result: &Result<T, CoreError>) -> Self {
        match result {
            Ok(_) => StatusClass::Success,
            Err(e) => e.http_status.map_or(StatusClass::Other, StatusClass::from_http),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Success     => "2xx",
            StatusClass::RateLimited => "429",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Other       => "other",
        }
    }
}
