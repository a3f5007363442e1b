//! Instantly v2 HTTP client.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::InstantlyError;
use crate::pagination::{PageSource, LEADS_LIST_ENDPOINT};
use crate::retry::RetryPolicy;
use crate::types::{Campaign, DeleteOutcome, MoveLeads, NewLead, Page, VendorLead};

/// Client for the Instantly v2 REST API.
#[derive(Clone)]
pub struct InstantlyClient {
    http: Client,
    config: ClientConfig,
}

impl InstantlyClient {
    /// Build a client from configuration.
    pub fn new(config: ClientConfig) -> Result<Self, InstantlyError> {
        if config.api_key.trim().is_empty() {
            return Err(InstantlyError::Config("API key is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(InstantlyError::Http)?;

        Ok(Self { http, config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch one page of `POST /api/v2/leads/list`.
    pub async fn list_leads_page(&self, body: &Value) -> Result<Page<Value>, InstantlyError> {
        self.post_page(LEADS_LIST_ENDPOINT, body).await
    }

    /// Search leads by email address across all campaigns.
    pub async fn search_leads(&self, email: &str) -> Result<Vec<VendorLead>, InstantlyError> {
        let body = json!({ "search": email, "limit": 10 });
        let page: Page<VendorLead> = self
            .send_json(self.authed(self.http.post(self.config.url(LEADS_LIST_ENDPOINT))).json(&body))
            .await?;

        let wanted = email.trim().to_lowercase();
        Ok(page
            .items
            .into_iter()
            .filter(|lead| lead.email.to_lowercase() == wanted)
            .collect())
    }

    /// Fetch a lead by id. Returns `Ok(None)` when the vendor no longer has it.
    pub async fn get_lead(&self, lead_id: &str) -> Result<Option<VendorLead>, InstantlyError> {
        let url = self.config.url(&lead_path(lead_id));
        debug!("GET {}", url);

        let response = self.authed(self.http.get(&url)).send().await?;
        decode_lookup(response).await
    }

    /// Create a lead in a campaign.
    pub async fn create_lead(&self, lead: &NewLead) -> Result<VendorLead, InstantlyError> {
        let url = self.config.url("/api/v2/leads");
        let created: VendorLead = self.send_json(self.authed(self.http.post(&url)).json(lead)).await?;
        info!("Created lead {} in campaign {}", created.id, lead.campaign);
        Ok(created)
    }

    /// Move leads to another campaign. Returns the vendor's job description.
    pub async fn move_leads(
        &self,
        lead_ids: &[String],
        to_campaign_id: &str,
    ) -> Result<Value, InstantlyError> {
        let url = self.config.url("/api/v2/leads/move");
        let body = MoveLeads::new(lead_ids, to_campaign_id);
        info!("Moving {} leads to campaign {}", body.ids.len(), body.to_campaign_id);
        self.send_json(self.authed(self.http.post(&url)).json(&body))
            .await
    }

    /// Delete a lead. 404 and 409 count as already deleted.
    pub async fn delete_lead(&self, lead_id: &str) -> Result<DeleteOutcome, InstantlyError> {
        let url = self.config.url(&lead_path(lead_id));
        debug!("DELETE {}", url);

        let response = self.authed(self.http.delete(&url)).send().await?;
        let status = response.status().as_u16();
        let body = if status >= 300 {
            response.text().await.unwrap_or_default()
        } else {
            String::new()
        };

        delete_outcome(status, body)
    }

    /// Delete a lead, retrying transient failures according to `policy`.
    pub async fn delete_lead_with_retry(
        &self,
        lead_id: &str,
        policy: &RetryPolicy,
    ) -> Result<DeleteOutcome, InstantlyError> {
        policy
            .run(&format!("delete lead {}", lead_id), || self.delete_lead(lead_id))
            .await
    }

    /// List every campaign visible to the API key.
    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>, InstantlyError> {
        let mut campaigns = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.config.url("/api/v2/campaigns"))
                .query(&[("limit", "100")]);
            if let Some(cursor) = &starting_after {
                request = request.query(&[("starting_after", cursor.as_str())]);
            }

            let page: Page<Campaign> = self.send_json(self.authed(request)).await?;
            if page.items.is_empty() {
                break;
            }
            campaigns.extend(page.items);

            match page.next_starting_after {
                Some(next) if starting_after.as_deref() != Some(next.as_str()) => {
                    starting_after = Some(next);
                }
                _ => break,
            }
        }

        Ok(campaigns)
    }

    /// Fetch a campaign by id.
    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, InstantlyError> {
        let path = format!("/api/v2/campaigns/{}", urlencoding::encode(campaign_id));
        let response = self.authed(self.http.get(self.config.url(&path))).send().await?;
        decode_lookup(response).await
    }

    async fn post_page(&self, endpoint: &str, body: &Value) -> Result<Page<Value>, InstantlyError> {
        let url = self.config.url(endpoint);
        debug!("POST {} {}", url, body);
        self.send_json(self.authed(self.http.post(&url)).json(body))
            .await
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.api_key)
            .header("Accept", "application/json")
    }

    async fn send_json<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, InstantlyError> {
        let response = request.send().await?;
        decode(response).await
    }
}

#[async_trait]
impl PageSource for InstantlyClient {
    async fn fetch_page(&self, endpoint: &str, body: &Value) -> Result<Page<Value>, InstantlyError> {
        self.post_page(endpoint, body).await
    }
}

impl std::fmt::Debug for InstantlyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantlyClient")
            .field("config", &self.config)
            .finish()
    }
}

fn lead_path(lead_id: &str) -> String {
    format!("/api/v2/leads/{}", urlencoding::encode(lead_id))
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, InstantlyError> {
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    parse_response(status, &bytes)
}

async fn decode_lookup<R: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<R>, InstantlyError> {
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    parse_lookup(status, &bytes)
}

/// Map a response status and body to a decoded value.
pub fn parse_response<R: DeserializeOwned>(status: u16, body: &[u8]) -> Result<R, InstantlyError> {
    if status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
        warn!("Instantly API rate limit hit");
        return Err(InstantlyError::RateLimited);
    }
    if !(200..300).contains(&status) {
        return Err(InstantlyError::Status {
            status,
            body: truncate(&String::from_utf8_lossy(body), 800),
        });
    }
    Ok(serde_json::from_slice(body)?)
}

/// Like [`parse_response`], but a 404 means the resource does not exist.
pub fn parse_lookup<R: DeserializeOwned>(
    status: u16,
    body: &[u8],
) -> Result<Option<R>, InstantlyError> {
    if status == StatusCode::NOT_FOUND.as_u16() {
        return Ok(None);
    }
    parse_response(status, body).map(Some)
}

/// Map a DELETE response status to an outcome.
///
/// 200/204 delete the lead, 404/409 mean it is already gone, 429 is a rate
/// limit and anything else is a failure.
pub fn delete_outcome(status: u16, body: String) -> Result<DeleteOutcome, InstantlyError> {
    match status {
        200..=204 => Ok(DeleteOutcome::Deleted),
        404 | 409 => Ok(DeleteOutcome::AlreadyGone),
        429 => Err(InstantlyError::RateLimited),
        _ => Err(InstantlyError::Status {
            status,
            body: truncate(&body, 800),
        }),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
