//! Wire types for the Instantly v2 API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Hard bounce ESP codes.
pub const HARD_BOUNCE_CODES: [i64; 3] = [550, 551, 553];

/// Soft (transient) bounce ESP codes.
pub const SOFT_BOUNCE_CODES: [i64; 3] = [421, 450, 451];

/// Treat an explicit JSON `null` the same as a missing field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A lead as reported by Instantly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorLead {
    /// Vendor lead id (UUID).
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,

    /// Lead email address.
    #[serde(default, deserialize_with = "null_default")]
    pub email: String,

    /// Campaign the lead is assigned to, if any.
    #[serde(default)]
    pub campaign: Option<String>,

    /// Numeric lifecycle status (1 active, 2 paused, 3 finished).
    #[serde(default, deserialize_with = "null_default")]
    pub status: i64,

    /// Delivery outcome code from the sending ESP (0 when unknown).
    #[serde(default, deserialize_with = "null_default")]
    pub esp_code: i64,

    #[serde(default, deserialize_with = "null_default")]
    pub email_reply_count: u32,

    #[serde(default, deserialize_with = "null_default")]
    pub email_open_count: u32,

    #[serde(default, deserialize_with = "null_default")]
    pub email_click_count: u32,

    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub timestamp_created: Option<String>,

    /// RFC 3339 last update timestamp.
    #[serde(default)]
    pub timestamp_updated: Option<String>,

    /// Free-form status description (carries unsubscribe notices).
    #[serde(default)]
    pub status_text: Option<String>,

    /// Opaque vendor payload.
    #[serde(default)]
    pub payload: Option<LeadPayload>,
}

/// The subset of the vendor payload the drain cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadPayload {
    /// Set by Instantly when an out-of-office reply paused the sequence.
    #[serde(default)]
    pub pause_until: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VendorLead {
    /// Create a lead with the given id, email and status.
    pub fn new(id: impl Into<String>, email: impl Into<String>, status: i64) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            status,
            ..Default::default()
        }
    }

    /// Lifecycle stage decoded from the numeric status.
    pub fn vendor_status(&self) -> VendorStatus {
        VendorStatus::from_code(self.status)
    }

    /// The auto-reply marker, if present and non-empty.
    pub fn pause_until(&self) -> Option<String> {
        let value = self.payload.as_ref()?.pause_until.as_ref()?;
        match value {
            Value::Null => None,
            Value::Bool(false) => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn is_hard_bounce(&self) -> bool {
        HARD_BOUNCE_CODES.contains(&self.esp_code)
    }

    pub fn is_soft_bounce(&self) -> bool {
        SOFT_BOUNCE_CODES.contains(&self.esp_code)
    }

    /// Whether the vendor reports the lead as unsubscribed.
    pub fn is_unsubscribed(&self) -> bool {
        self.status_text
            .as_deref()
            .is_some_and(|text| text.to_lowercase().contains("unsubscribed"))
    }

    pub fn with_campaign(mut self, campaign: impl Into<String>) -> Self {
        self.campaign = Some(campaign.into());
        self
    }

    pub fn with_replies(mut self, count: u32) -> Self {
        self.email_reply_count = count;
        self
    }

    pub fn with_esp_code(mut self, code: i64) -> Self {
        self.esp_code = code;
        self
    }

    pub fn with_created(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp_created = Some(timestamp.into());
        self
    }

    pub fn with_pause_until(mut self, pause_until: impl Into<String>) -> Self {
        let payload = self.payload.get_or_insert_with(LeadPayload::default);
        payload.pause_until = Some(Value::String(pause_until.into()));
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }
}

/// Decoded vendor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorStatus {
    Active,
    Paused,
    Finished,
    Other(i64),
}

impl VendorStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => VendorStatus::Active,
            2 => VendorStatus::Paused,
            3 => VendorStatus::Finished,
            other => VendorStatus::Other(other),
        }
    }
}

/// One page of a cursor-paginated list response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_default")]
    pub items: Vec<T>,

    /// Cursor for the next page; absent on the last page.
    #[serde(default)]
    pub next_starting_after: Option<String>,
}

/// A campaign as reported by Instantly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,

    #[serde(default, deserialize_with = "null_default")]
    pub name: String,

    /// Numeric campaign status (0 draft, 1 active, 2 paused, 3 completed).
    #[serde(default)]
    pub status: Option<i64>,
}

/// Request body for creating a lead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewLead {
    pub campaign: String,
    pub email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub custom_variables: Map<String, Value>,
}

impl NewLead {
    pub fn new(campaign: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            campaign: campaign.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_company(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = Some(company_name.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom_variables.insert(key.into(), value.into());
        self
    }
}

/// Request body for moving leads between campaigns.
#[derive(Debug, Clone, Serialize)]
pub struct MoveLeads {
    pub ids: Vec<String>,
    pub to_campaign_id: String,
}

impl MoveLeads {
    pub fn new(lead_ids: &[String], to_campaign_id: impl Into<String>) -> Self {
        Self {
            ids: lead_ids.to_vec(),
            to_campaign_id: to_campaign_id.into(),
        }
    }
}

/// Result of a single delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The lead was deleted (200/204).
    Deleted,
    /// The lead was already gone (404/409); treated as success.
    AlreadyGone,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vendor_lead_tolerates_nulls() {
        let lead: VendorLead = serde_json::from_value(json!({
            "id": "abc",
            "email": "info@example.com",
            "status": 3,
            "esp_code": null,
            "email_reply_count": null,
            "payload": null,
            "unknown_field": {"nested": true}
        }))
        .unwrap();

        assert_eq!(lead.status, 3);
        assert_eq!(lead.esp_code, 0);
        assert_eq!(lead.email_reply_count, 0);
        assert!(lead.pause_until().is_none());
        assert_eq!(lead.vendor_status(), VendorStatus::Finished);
    }

    #[test]
    fn test_pause_until_detection() {
        let lead: VendorLead = serde_json::from_value(json!({
            "id": "abc",
            "email": "ooo@example.com",
            "payload": {"pause_until": "2025-09-01", "firstName": "Kelly"}
        }))
        .unwrap();
        assert_eq!(lead.pause_until().as_deref(), Some("2025-09-01"));

        let empty: VendorLead = serde_json::from_value(json!({
            "payload": {"pause_until": ""}
        }))
        .unwrap();
        assert!(empty.pause_until().is_none());
    }

    #[test]
    fn test_bounce_and_unsubscribe_helpers() {
        let lead = VendorLead::new("a", "a@example.com", 1)
            .with_esp_code(551)
            .with_status_text("User Unsubscribed from campaign");
        assert!(lead.is_hard_bounce());
        assert!(!lead.is_soft_bounce());
        assert!(lead.is_unsubscribed());
    }

    #[test]
    fn test_page_decoding() {
        let page: Page<VendorLead> = serde_json::from_value(json!({
            "items": [{"id": "1", "email": "a@example.com", "status": 1}],
            "next_starting_after": "1"
        }))
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_starting_after.as_deref(), Some("1"));

        let last: Page<VendorLead> = serde_json::from_value(json!({"items": null})).unwrap();
        assert!(last.items.is_empty());
        assert!(last.next_starting_after.is_none());
    }

    #[test]
    fn test_new_lead_serialization_skips_empty() {
        let lead = NewLead::new("camp", "a@example.com").with_company("Acme");
        let value = serde_json::to_value(&lead).unwrap();
        assert_eq!(value["company_name"], "Acme");
        assert!(value.get("first_name").is_none());
        assert!(value.get("custom_variables").is_none());
    }

    #[test]
    fn test_move_leads_body() {
        let ids = vec!["id-1".to_string(), "id-2".to_string()];
        let body = MoveLeads::new(&ids, "camp-target");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"ids": ["id-1", "id-2"], "to_campaign_id": "camp-target"})
        );
    }
}
