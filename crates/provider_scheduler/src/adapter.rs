use arb_detector::{ArbitrageOpportunity, CoreError, ProviderId};
use async_trait::async_trait;

use crate::scheduler::ProviderScheduler;

/// One upstream odds source.
///
/// The scheduler is handed in on every fetch and is the adapter's only way to
/// reach the network.
#[async_trait]
pub trait OddsAdapter: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Compliance marker: every network call goes through
    /// [`ProviderScheduler::schedule_provider_request`]. Adapters answering
    /// `false` are refused by [`ProviderScheduler::register_adapters`].
    fn routes_through_scheduler(&self) -> bool {
        true
    }

    async fn fetch_opportunities(
        &self,
        scheduler: &ProviderScheduler,
    ) -> Result<Vec<ArbitrageOpportunity>, CoreError>;
}
