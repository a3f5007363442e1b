//! The vendor operations the drain depends on.

use async_trait::async_trait;
use instantly_client::{
    Campaign, DeleteOutcome, InstantlyClient, InstantlyError, RetryPolicy, VendorLead,
};

/// Lead lookups and deletes against the vendor.
///
/// [`InstantlyClient`] is the production implementation; tests use
/// [`crate::mock::MockLeadApi`].
#[async_trait]
pub trait LeadApi: Send + Sync {
    /// Fetch a lead by vendor id. `Ok(None)` when the vendor no longer has it.
    async fn get_lead(&self, lead_id: &str) -> Result<Option<VendorLead>, InstantlyError>;

    /// Find leads by email across campaigns.
    async fn search_leads(&self, email: &str) -> Result<Vec<VendorLead>, InstantlyError>;

    /// Delete a lead, retrying transient failures.
    async fn delete_lead(
        &self,
        lead_id: &str,
        policy: &RetryPolicy,
    ) -> Result<DeleteOutcome, InstantlyError>;

    /// Every campaign visible to the caller.
    async fn list_campaigns(&self) -> Result<Vec<Campaign>, InstantlyError>;

    /// Implementation name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl LeadApi for InstantlyClient {
    async fn get_lead(&self, lead_id: &str) -> Result<Option<VendorLead>, InstantlyError> {
        InstantlyClient::get_lead(self, lead_id).await
    }

    async fn search_leads(&self, email: &str) -> Result<Vec<VendorLead>, InstantlyError> {
        InstantlyClient::search_leads(self, email).await
    }

    async fn delete_lead(
        &self,
        lead_id: &str,
        policy: &RetryPolicy,
    ) -> Result<DeleteOutcome, InstantlyError> {
        self.delete_lead_with_retry(lead_id, policy).await
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, InstantlyError> {
        InstantlyClient::list_campaigns(self).await
    }

    fn name(&self) -> &str {
        "instantly"
    }
}
