use arb_detector::ProviderId;
use std::collections::HashMap;
use std::env;

/// Source of provider API keys. `None` means the user never configured one.
pub trait CredentialLookup: Send + Sync {
    fn api_key_for(&self, provider: ProviderId) -> Option<String>;
}

/// Keys from `THE_ODDS_API_KEY` / `ODDS_API_IO_KEY`; blank values count as missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialLookup for EnvCredentials {
    fn api_key_for(&self, provider: ProviderId) -> Option<String> {
        env::var(format!("{}_KEY", provider.env_prefix()))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    keys: HashMap<ProviderId, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: ProviderId, key: impl Into<String>) -> Self {
        self.keys.insert(provider, key.into());
        self
    }
}

impl CredentialLookup for StaticCredentials {
    fn api_key_for(&self, provider: ProviderId) -> Option<String> {
        self.keys.get(&provider).filter(|k| !k.is_empty()).cloned()
    }
}
