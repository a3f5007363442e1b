//! In-memory vendor for exercising the drain without network access.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use instantly_client::{
    Campaign, DeleteOutcome, InstantlyError, Page, PageSource, RetryPolicy, VendorLead,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::LeadApi;

/// A fake vendor holding leads in memory.
///
/// Lookups and deletes can be made to fail per lead id with a given HTTP
/// status. Also implements [`PageSource`] so it can back a `CursorPaginator`.
#[derive(Debug, Default)]
pub struct MockLeadApi {
    leads: Mutex<BTreeMap<String, VendorLead>>,
    lookup_failures: HashMap<String, u16>,
    delete_failures: HashMap<String, u16>,
    campaigns: Vec<Campaign>,
    calls: Mutex<MockCalls>,
}

/// Calls the mock has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub lookups: Vec<String>,
    pub searches: Vec<String>,
    /// Every delete attempt, including retries.
    pub delete_attempts: Vec<String>,
    pub deleted: Vec<String>,
    pub pages: usize,
}

impl MockLeadApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lead the vendor knows about.
    pub fn with_lead(mut self, lead: VendorLead) -> Self {
        self.leads.get_mut().insert(lead.id.clone(), lead);
        self
    }

    /// Make lookups of `lead_id` fail with `status`.
    pub fn with_lookup_failure(mut self, lead_id: impl Into<String>, status: u16) -> Self {
        self.lookup_failures.insert(lead_id.into(), status);
        self
    }

    /// Make deletes of `lead_id` fail with `status`.
    pub fn with_delete_failure(mut self, lead_id: impl Into<String>, status: u16) -> Self {
        self.delete_failures.insert(lead_id.into(), status);
        self
    }

    pub fn with_campaign(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.campaigns.push(Campaign {
            id: id.into(),
            name: name.into(),
            status: Some(1),
        });
        self
    }

    /// Snapshot of the calls made so far.
    pub async fn calls(&self) -> MockCalls {
        self.calls.lock().await.clone()
    }

    /// Whether the vendor still holds `lead_id`.
    pub async fn has_lead(&self, lead_id: &str) -> bool {
        self.leads.lock().await.contains_key(lead_id)
    }

    fn failure(status: u16) -> InstantlyError {
        match status {
            429 => InstantlyError::RateLimited,
            _ => InstantlyError::Status {
                status,
                body: "mock failure".to_string(),
            },
        }
    }
}

#[async_trait]
impl LeadApi for MockLeadApi {
    async fn get_lead(&self, lead_id: &str) -> Result<Option<VendorLead>, InstantlyError> {
        self.calls.lock().await.lookups.push(lead_id.to_string());

        if let Some(status) = self.lookup_failures.get(lead_id) {
            return Err(Self::failure(*status));
        }
        Ok(self.leads.lock().await.get(lead_id).cloned())
    }

    async fn search_leads(&self, email: &str) -> Result<Vec<VendorLead>, InstantlyError> {
        self.calls.lock().await.searches.push(email.to_string());

        let wanted = email.trim().to_lowercase();
        Ok(self
            .leads
            .lock()
            .await
            .values()
            .filter(|lead| lead.email.to_lowercase() == wanted)
            .cloned()
            .collect())
    }

    async fn delete_lead(
        &self,
        lead_id: &str,
        policy: &RetryPolicy,
    ) -> Result<DeleteOutcome, InstantlyError> {
        policy
            .run(&format!("delete lead {}", lead_id), move || async move {
                self.calls.lock().await.delete_attempts.push(lead_id.to_string());

                if let Some(status) = self.delete_failures.get(lead_id) {
                    return Err(Self::failure(*status));
                }

                let removed = self.leads.lock().await.remove(lead_id);
                self.calls.lock().await.deleted.push(lead_id.to_string());
                Ok(match removed {
                    Some(_) => DeleteOutcome::Deleted,
                    None => DeleteOutcome::AlreadyGone,
                })
            })
            .await
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, InstantlyError> {
        Ok(self.campaigns.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[async_trait]
impl PageSource for MockLeadApi {
    async fn fetch_page(&self, _endpoint: &str, body: &Value) -> Result<Page<Value>, InstantlyError> {
        self.calls.lock().await.pages += 1;

        let campaign = body.get("campaign").and_then(Value::as_str);
        let cursor = body.get("starting_after").and_then(Value::as_str);
        let limit = body
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(100)
            .max(1) as usize;

        let leads = self.leads.lock().await;
        let matching: Vec<&VendorLead> = leads
            .values()
            .filter(|lead| campaign.is_none() || lead.campaign.as_deref() == campaign)
            .filter(|lead| cursor.map_or(true, |after| lead.id.as_str() > after))
            .collect();

        let page: Vec<&VendorLead> = matching.iter().take(limit).copied().collect();
        let next_starting_after = if matching.len() > limit {
            page.last().map(|lead| lead.id.clone())
        } else {
            None
        };

        let items = page
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            next_starting_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instantly_client::{CursorPaginator, PaginationOptions};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lookup_and_delete() {
        let api = MockLeadApi::new()
            .with_lead(VendorLead::new("id-1", "a@example.com", 3))
            .with_delete_failure("id-2", 500);

        assert!(api.get_lead("id-1").await.unwrap().is_some());
        assert!(api.get_lead("id-9").await.unwrap().is_none());

        let policy = RetryPolicy::immediate(3);
        assert_eq!(api.delete_lead("id-1", &policy).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(api.delete_lead("id-1", &policy).await.unwrap(), DeleteOutcome::AlreadyGone);
        assert!(api.delete_lead("id-2", &policy).await.is_err());

        let calls = api.calls().await;
        assert_eq!(calls.lookups, vec!["id-1", "id-9"]);
        assert_eq!(calls.deleted, vec!["id-1", "id-1"]);
        // One attempt per success, three for the failing lead
        assert_eq!(calls.delete_attempts.len(), 5);
    }

    #[tokio::test]
    async fn test_pages_through_paginator() {
        let mut api = MockLeadApi::new();
        for i in 0..25 {
            let campaign = if i % 5 == 0 { "camp-b" } else { "camp-a" };
            api = api.with_lead(
                VendorLead::new(format!("id-{:02}", i), format!("l{}@example.com", i), 1)
                    .with_campaign(campaign),
            );
        }

        let paginator = CursorPaginator::with_cache_ttl(api, Duration::ZERO);
        let options = PaginationOptions {
            page_size: 10,
            ..Default::default()
        };

        let (leads, stats) = paginator.fetch_all_leads(Some("camp-a"), &options).await;
        assert_eq!(leads.len(), 20);
        assert_eq!(stats.total_pages, 2);

        let (all, _) = paginator.fetch_all_leads(None, &options).await;
        assert_eq!(all.len(), 25);
    }
}
