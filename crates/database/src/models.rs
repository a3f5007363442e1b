//! Database models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Storage format for every timestamp column.
///
/// Fixed width and zero padded, so lexicographic order is chronological order.
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC instant for storage.
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp back into a UTC instant.
pub fn parse_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), DB_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Lifecycle status of a tracked lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Active,
    Pending,
    Completed,
    Replied,
    BouncedHard,
    Unsubscribed,
    StaleActive,
    VerificationFailed,
    /// The vendor no longer knows the lead.
    Missing,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 9] = [
        LeadStatus::Active,
        LeadStatus::Pending,
        LeadStatus::Completed,
        LeadStatus::Replied,
        LeadStatus::BouncedHard,
        LeadStatus::Unsubscribed,
        LeadStatus::StaleActive,
        LeadStatus::VerificationFailed,
        LeadStatus::Missing,
    ];

    /// Statuses the drain re-evaluates.
    pub const DRAINABLE: [LeadStatus; 2] = [LeadStatus::Active, LeadStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Active => "active",
            LeadStatus::Pending => "pending",
            LeadStatus::Completed => "completed",
            LeadStatus::Replied => "replied",
            LeadStatus::BouncedHard => "bounced_hard",
            LeadStatus::Unsubscribed => "unsubscribed",
            LeadStatus::StaleActive => "stale_active",
            LeadStatus::VerificationFailed => "verification_failed",
            LeadStatus::Missing => "missing",
        }
    }

    /// Whether the drain still considers leads in this status.
    pub fn is_drainable(&self) -> bool {
        Self::DRAINABLE.contains(self)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown lead status: {}", s))
    }
}

/// A row of `ops_inst_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LeadState {
    pub email: String,
    pub campaign_id: String,
    /// Raw status text; see [`LeadState::lead_status`].
    pub status: String,
    pub instantly_lead_id: Option<String>,
    pub added_at: String,
    pub updated_at: String,
    pub last_drain_check: Option<String>,
    pub verification_status: Option<String>,
    pub verification_catch_all: Option<bool>,
    pub verification_credits_used: Option<i64>,
    pub verified_at: Option<String>,
    pub deletion_status: Option<String>,
    pub deletion_attempts: i64,
    pub last_deletion_attempt: Option<String>,
}

impl LeadState {
    /// Parsed status, if it is one we know.
    pub fn lead_status(&self) -> Option<LeadStatus> {
        self.status.parse().ok()
    }
}

/// Fields needed to insert or refresh a tracked lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLeadState {
    pub email: String,
    pub campaign_id: String,
    pub status: LeadStatus,
    pub instantly_lead_id: Option<String>,
}

impl NewLeadState {
    pub fn active(
        email: impl Into<String>,
        campaign_id: impl Into<String>,
        instantly_lead_id: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            campaign_id: campaign_id.into(),
            status: LeadStatus::Active,
            instantly_lead_id: Some(instantly_lead_id.into()),
        }
    }
}

/// A lead selected for re-evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DrainCandidate {
    pub email: String,
    pub campaign_id: String,
    pub status: String,
    pub instantly_lead_id: Option<String>,
    pub last_drain_check: Option<String>,
}

/// A row of `ops_lead_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LeadHistoryEntry {
    pub id: i64,
    pub email: String,
    pub campaign_id: String,
    /// "SMB" or "Midsize" for the tracked campaigns.
    pub sequence_name: String,
    pub status_final: String,
    pub completed_at: String,
    /// 1 for the first completion of this email, then counting up.
    pub attempt_num: i64,
}

/// A recorded failed vendor or store operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DeadLetter {
    pub id: String,
    pub occurred_at: String,
    /// Where it failed, e.g. "drain_lookup" or "drain_delete".
    pub phase: String,
    pub email: Option<String>,
    pub http_status: Option<i64>,
    pub error_text: String,
    pub retry_count: i64,
}

/// A permanent suppression entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DoNotContact {
    pub id: String,
    pub email: String,
    pub domain: String,
    pub source: String,
    pub reason: String,
    pub added_at: String,
    pub added_by: String,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_timestamp_round_trip() {
        let at = Utc.with_ymd_and_hms(2025, 9, 3, 7, 5, 9).unwrap();
        let text = db_timestamp(at);
        assert_eq!(text, "2025-09-03 07:05:09");
        assert_eq!(parse_db_timestamp(&text), Some(at));
        assert_eq!(parse_db_timestamp("not a time"), None);
    }

    #[test]
    fn test_db_timestamps_sort_chronologically() {
        let earlier = db_timestamp(Utc.with_ymd_and_hms(2025, 9, 3, 23, 0, 0).unwrap());
        let later = db_timestamp(Utc.with_ymd_and_hms(2025, 10, 1, 1, 0, 0).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn test_lead_status_strings() {
        for status in LeadStatus::ALL {
            assert_eq!(status.as_str().parse::<LeadStatus>().unwrap(), status);
        }
        assert_eq!("BOUNCED_HARD".parse::<LeadStatus>().unwrap(), LeadStatus::BouncedHard);
        assert!("deleted".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn test_drainable_statuses() {
        assert!(LeadStatus::Active.is_drainable());
        assert!(LeadStatus::Pending.is_drainable());
        assert!(!LeadStatus::Completed.is_drainable());
        assert!(!LeadStatus::Missing.is_drainable());
    }
}
