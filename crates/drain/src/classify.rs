//! The drain classification rule.
//!
//! [`classify`] is a pure function of one vendor lead and the current time.
//! Rules are evaluated in order and the first match wins:
//!
//! | # | Condition | Decision |
//! |---|-----------|----------|
//! | 1 | finished, replies > 0 | keep if `pause_until` is set (auto-reply), else drain `replied` |
//! | 2 | finished, no replies | drain `completed` |
//! | 3 | hard bounce (550/551/553) | drain `bounced_hard` once the grace period is over, else keep |
//! | 4 | soft bounce (421/450/451) | keep |
//! | 5 | status text mentions "unsubscribed" | drain `unsubscribed` |
//! | 6 | active and older than the stale threshold | drain `stale_active` |
//! | 7 | active, replies > 0, `pause_until` set | keep (active auto-reply) |
//! | 8 | anything else | keep |

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use instantly_client::VendorLead;
use lead_store::LeadStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DrainThresholds;

/// Terminal disposition of a drained lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Completed,
    Replied,
    BouncedHard,
    Unsubscribed,
    StaleActive,
}

impl Disposition {
    pub const ALL: [Disposition; 5] = [
        Disposition::Completed,
        Disposition::Replied,
        Disposition::BouncedHard,
        Disposition::Unsubscribed,
        Disposition::StaleActive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed => "completed",
            Disposition::Replied => "replied",
            Disposition::BouncedHard => "bounced_hard",
            Disposition::Unsubscribed => "unsubscribed",
            Disposition::StaleActive => "stale_active",
        }
    }

    /// State store status written after the drain.
    pub fn lead_status(&self) -> LeadStatus {
        match self {
            Disposition::Completed => LeadStatus::Completed,
            Disposition::Replied => LeadStatus::Replied,
            Disposition::BouncedHard => LeadStatus::BouncedHard,
            Disposition::Unsubscribed => LeadStatus::Unsubscribed,
            Disposition::StaleActive => LeadStatus::StaleActive,
        }
    }

    /// Whether the disposition starts a re-contact cooldown.
    pub fn records_history(&self) -> bool {
        matches!(self, Disposition::Completed | Disposition::Replied)
    }

    /// Whether the disposition puts the email on the do-not-contact list.
    pub fn suppresses(&self) -> bool {
        matches!(self, Disposition::Unsubscribed)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a lead stays in its campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum KeepReason {
    /// Finished with replies, but the replies were out-of-office.
    AutoReply { pause_until: String },
    /// Hard bounce younger than the grace period.
    HardBounceGrace { esp_code: i64, age_days: i64 },
    /// Transient delivery failure.
    SoftBounce { esp_code: i64 },
    /// Active lead paused by an out-of-office reply.
    ActiveAutoReply { pause_until: String },
    /// Nothing to do yet.
    Active { status: i64, age_days: i64 },
    /// The lead could not be read.
    ClassificationError { message: String },
}

impl KeepReason {
    pub fn is_auto_reply(&self) -> bool {
        matches!(
            self,
            KeepReason::AutoReply { .. } | KeepReason::ActiveAutoReply { .. }
        )
    }
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepReason::AutoReply { pause_until } => {
                write!(f, "auto-reply detected (paused until {})", pause_until)
            }
            KeepReason::HardBounceGrace { esp_code, age_days } => write!(
                f,
                "recent hard bounce (ESP {}, {} days old), within grace period",
                esp_code, age_days
            ),
            KeepReason::SoftBounce { esp_code } => {
                write!(f, "soft bounce (ESP {}), transient", esp_code)
            }
            KeepReason::ActiveAutoReply { pause_until } => write!(
                f,
                "active lead with auto-reply (paused until {}), sequence continues",
                pause_until
            ),
            KeepReason::Active { status, age_days } => {
                write!(f, "status {} lead, {} days old", status, age_days)
            }
            KeepReason::ClassificationError { message } => {
                write!(f, "classification error: {}", message)
            }
        }
    }
}

/// Outcome of classifying one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DrainDecision {
    Keep(KeepReason),
    Drain {
        disposition: Disposition,
        details: String,
    },
}

impl DrainDecision {
    pub fn should_drain(&self) -> bool {
        matches!(self, DrainDecision::Drain { .. })
    }

    pub fn disposition(&self) -> Option<Disposition> {
        match self {
            DrainDecision::Drain { disposition, .. } => Some(*disposition),
            DrainDecision::Keep(_) => None,
        }
    }

    pub fn keep_reason(&self) -> Option<&KeepReason> {
        match self {
            DrainDecision::Keep(reason) => Some(reason),
            DrainDecision::Drain { .. } => None,
        }
    }

    fn drain(disposition: Disposition, details: String) -> Self {
        DrainDecision::Drain {
            disposition,
            details,
        }
    }
}

impl fmt::Display for DrainDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainDecision::Keep(reason) => write!(f, "keep: {}", reason),
            DrainDecision::Drain {
                disposition,
                details,
            } => write!(f, "drain {}: {}", disposition, details),
        }
    }
}

/// Classify a lead with the default thresholds.
pub fn classify(lead: &VendorLead, now: DateTime<Utc>) -> DrainDecision {
    classify_with(lead, now, &DrainThresholds::default())
}

/// Classify a lead.
pub fn classify_with(
    lead: &VendorLead,
    now: DateTime<Utc>,
    thresholds: &DrainThresholds,
) -> DrainDecision {
    let age_days = lead_age_days(lead.timestamp_created.as_deref(), now);
    let replies = lead.email_reply_count;
    let pause_until = lead.pause_until();

    if lead.status == 3 {
        if replies > 0 {
            return match pause_until {
                Some(pause_until) => DrainDecision::Keep(KeepReason::AutoReply { pause_until }),
                None => DrainDecision::drain(
                    Disposition::Replied,
                    format!("finished with {} replies, no auto-reply marker", replies),
                ),
            };
        }
        return DrainDecision::drain(
            Disposition::Completed,
            "sequence completed without replies".to_string(),
        );
    }

    if lead.is_hard_bounce() {
        if age_days >= thresholds.hard_bounce_grace_days {
            return DrainDecision::drain(
                Disposition::BouncedHard,
                format!("hard bounce (ESP {}) after {} days", lead.esp_code, age_days),
            );
        }
        return DrainDecision::Keep(KeepReason::HardBounceGrace {
            esp_code: lead.esp_code,
            age_days,
        });
    }

    if lead.is_soft_bounce() {
        return DrainDecision::Keep(KeepReason::SoftBounce {
            esp_code: lead.esp_code,
        });
    }

    if lead.is_unsubscribed() {
        return DrainDecision::drain(
            Disposition::Unsubscribed,
            format!(
                "vendor reports unsubscribe: {}",
                lead.status_text.as_deref().unwrap_or_default()
            ),
        );
    }

    if lead.status == 1 && age_days >= thresholds.stale_active_days {
        return DrainDecision::drain(
            Disposition::StaleActive,
            format!("active lead stuck for {} days", age_days),
        );
    }

    if lead.status == 1 && replies > 0 {
        if let Some(pause_until) = pause_until {
            return DrainDecision::Keep(KeepReason::ActiveAutoReply { pause_until });
        }
    }

    DrainDecision::Keep(KeepReason::Active {
        status: lead.status,
        age_days,
    })
}

/// Classify a raw vendor JSON record. Records that cannot be decoded are kept.
pub fn classify_value(
    value: &Value,
    now: DateTime<Utc>,
    thresholds: &DrainThresholds,
) -> DrainDecision {
    match VendorLead::deserialize(value) {
        Ok(lead) => classify_with(&lead, now, thresholds),
        Err(e) => DrainDecision::Keep(KeepReason::ClassificationError {
            message: e.to_string(),
        }),
    }
}

/// Whole days between `created` and `now`, floored. Missing, unparseable or
/// future timestamps count as age 0.
pub fn lead_age_days(created: Option<&str>, now: DateTime<Utc>) -> i64 {
    created
        .and_then(parse_vendor_timestamp)
        .map(|created| (now - created).num_days().max(0))
        .unwrap_or(0)
}

/// Parse the timestamp shapes Instantly emits.
pub fn parse_vendor_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 15, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> String {
        (now() - Duration::days(days)).to_rfc3339()
    }

    fn lead(status: i64, age_days: i64) -> VendorLead {
        VendorLead::new("lead-1", "info@example.com", status).with_created(days_ago(age_days))
    }

    fn drained_as(decision: &DrainDecision) -> Option<Disposition> {
        decision.disposition()
    }

    #[test]
    fn test_finished_without_replies_is_completed() {
        for age in [0, 10, 400] {
            let decision = classify(&lead(3, age), now());
            assert_eq!(drained_as(&decision), Some(Disposition::Completed));
        }
    }

    #[test]
    fn test_finished_with_genuine_reply_is_replied() {
        let decision = classify(&lead(3, 10).with_replies(2), now());
        assert_eq!(drained_as(&decision), Some(Disposition::Replied));
    }

    #[test]
    fn test_finished_with_auto_reply_is_kept() {
        let decision = classify(&lead(3, 1).with_replies(1).with_pause_until("2025-09-01"), now());
        assert_eq!(
            decision,
            DrainDecision::Keep(KeepReason::AutoReply {
                pause_until: "2025-09-01".to_string()
            })
        );
        assert!(decision.keep_reason().unwrap().is_auto_reply());
    }

    #[test]
    fn test_null_pause_until_counts_as_absent() {
        let value = json!({
            "id": "lead-1",
            "email": "info@example.com",
            "status": 3,
            "email_reply_count": 2,
            "timestamp_created": days_ago(10),
            "payload": { "pause_until": null }
        });
        let decision = classify_value(&value, now(), &DrainThresholds::default());
        assert_eq!(drained_as(&decision), Some(Disposition::Replied));
    }

    #[test]
    fn test_hard_bounce_grace_period() {
        for code in [550, 551, 553] {
            let recent = classify(&lead(1, 3).with_esp_code(code), now());
            assert_eq!(
                recent,
                DrainDecision::Keep(KeepReason::HardBounceGrace {
                    esp_code: code,
                    age_days: 3
                })
            );

            let boundary = classify(&lead(1, 7).with_esp_code(code), now());
            assert_eq!(drained_as(&boundary), Some(Disposition::BouncedHard));

            let old = classify(&lead(1, 10).with_esp_code(code), now());
            assert_eq!(drained_as(&old), Some(Disposition::BouncedHard));
        }
    }

    #[test]
    fn test_soft_bounce_is_kept_for_any_age() {
        for code in [421, 450, 451] {
            for (status, age) in [(1, 0), (1, 200), (2, 30), (0, 95)] {
                let decision = classify(&lead(status, age).with_esp_code(code), now());
                assert_eq!(decision, DrainDecision::Keep(KeepReason::SoftBounce { esp_code: code }));
            }
        }
    }

    #[test]
    fn test_unsubscribed_text_is_case_insensitive() {
        let decision = classify(&lead(2, 5).with_status_text("Lead UNSUBSCRIBED via link"), now());
        assert_eq!(drained_as(&decision), Some(Disposition::Unsubscribed));
    }

    #[test]
    fn test_stale_active() {
        let decision = classify(&lead(1, 95), now());
        assert_eq!(drained_as(&decision), Some(Disposition::StaleActive));

        let boundary = classify(&lead(1, 90), now());
        assert_eq!(drained_as(&boundary), Some(Disposition::StaleActive));

        let young = classify(&lead(1, 89), now());
        assert_eq!(young, DrainDecision::Keep(KeepReason::Active { status: 1, age_days: 89 }));

        // Paused leads never go stale
        let paused = classify(&lead(2, 200), now());
        assert!(!paused.should_drain());
    }

    #[test]
    fn test_active_auto_reply_is_kept() {
        let decision = classify(&lead(1, 20).with_replies(1).with_pause_until("2025-09-20"), now());
        assert_eq!(
            decision,
            DrainDecision::Keep(KeepReason::ActiveAutoReply {
                pause_until: "2025-09-20".to_string()
            })
        );
    }

    #[test]
    fn test_rule_order() {
        // Finished beats hard bounce
        let decision = classify(&lead(3, 1).with_esp_code(550), now());
        assert_eq!(drained_as(&decision), Some(Disposition::Completed));

        // Hard bounce beats unsubscribe
        let decision = classify(
            &lead(1, 10).with_esp_code(551).with_status_text("unsubscribed"),
            now(),
        );
        assert_eq!(drained_as(&decision), Some(Disposition::BouncedHard));

        // Soft bounce beats stale
        let decision = classify(&lead(1, 120).with_esp_code(421), now());
        assert!(!decision.should_drain());

        // Stale beats active auto-reply
        let decision = classify(&lead(1, 100).with_replies(1).with_pause_until("2025-09-20"), now());
        assert_eq!(drained_as(&decision), Some(Disposition::StaleActive));
    }

    #[test]
    fn test_missing_or_bad_timestamp_is_age_zero() {
        let no_created = VendorLead::new("lead-1", "info@example.com", 1).with_esp_code(550);
        assert!(!classify(&no_created, now()).should_drain());

        let garbage = no_created.clone().with_created("last tuesday");
        assert!(!classify(&garbage, now()).should_drain());

        assert_eq!(lead_age_days(Some("not a date"), now()), 0);
        assert_eq!(lead_age_days(None, now()), 0);
    }

    #[test]
    fn test_age_is_floored() {
        let created = (now() - Duration::days(6) - Duration::hours(23)).to_rfc3339();
        assert_eq!(lead_age_days(Some(&created), now()), 6);

        let future = (now() + Duration::days(2)).to_rfc3339();
        assert_eq!(lead_age_days(Some(&future), now()), 0);
    }

    #[test]
    fn test_vendor_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 8, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_vendor_timestamp("2025-08-01T10:30:00.000Z"), Some(expected));
        assert_eq!(parse_vendor_timestamp("2025-08-01T10:30:00+00:00"), Some(expected));
        assert_eq!(parse_vendor_timestamp("2025-08-01T10:30:00"), Some(expected));
        assert_eq!(parse_vendor_timestamp("2025-08-01 10:30:00"), Some(expected));
        assert_eq!(
            parse_vendor_timestamp("2025-08-01"),
            Some(Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_vendor_timestamp(""), None);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let leads = [
            lead(3, 10).with_replies(2),
            lead(1, 3).with_esp_code(550),
            lead(1, 95),
            lead(2, 1),
        ];
        for lead in &leads {
            assert_eq!(classify(lead, now()), classify(lead, now()));
        }
    }

    #[test]
    fn test_undecodable_record_is_kept() {
        let thresholds = DrainThresholds::default();
        for value in [
            json!("not an object"),
            json!({ "status": "finished" }),
            json!({ "status": 3, "email_reply_count": -1 }),
        ] {
            let decision = classify_value(&value, now(), &thresholds);
            assert!(matches!(
                decision,
                DrainDecision::Keep(KeepReason::ClassificationError { .. })
            ));
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let strict = DrainThresholds {
            hard_bounce_grace_days: 0,
            stale_active_days: 30,
        };
        let bounce = lead(1, 0).with_esp_code(553);
        assert_eq!(
            drained_as(&classify_with(&bounce, now(), &strict)),
            Some(Disposition::BouncedHard)
        );
        assert_eq!(
            drained_as(&classify_with(&lead(1, 31), now(), &strict)),
            Some(Disposition::StaleActive)
        );
    }

    #[test]
    fn test_disposition_side_effects() {
        assert!(Disposition::Completed.records_history());
        assert!(Disposition::Replied.records_history());
        assert!(!Disposition::BouncedHard.records_history());
        assert!(Disposition::Unsubscribed.suppresses());
        assert!(!Disposition::StaleActive.suppresses());
        for disposition in Disposition::ALL {
            assert_eq!(disposition.lead_status().as_str(), disposition.as_str());
        }
    }
}
