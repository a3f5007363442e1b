//! Lead state operations and drain candidate selection.

use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::{db_timestamp, DrainCandidate, LeadState, LeadStatus, NewLeadState};
use crate::validation::normalize_email;
use crate::{do_not_contact, lead_history};

const LEAD_STATE_COLUMNS: &str = r#"
    email, campaign_id, status, instantly_lead_id, added_at, updated_at,
    last_drain_check, verification_status, verification_catch_all,
    verification_credits_used, verified_at, deletion_status,
    deletion_attempts, last_deletion_attempt
"#;

/// Default number of candidates per drain batch.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Default hours before a checked lead is eligible again.
pub const DEFAULT_RECHECK_HOURS: i64 = 24;

/// Parameters for [`select_drain_candidates`].
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    /// Only leads in these campaigns qualify.
    pub campaign_ids: Vec<String>,
    /// Leads checked more recently than this are skipped.
    pub recheck_after: Duration,
    pub batch_size: u32,
    pub now: DateTime<Utc>,
    /// Ignore the recheck window.
    pub force: bool,
}

impl CandidateQuery {
    pub fn new(campaign_ids: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            campaign_ids,
            recheck_after: Duration::hours(DEFAULT_RECHECK_HOURS),
            batch_size: DEFAULT_BATCH_SIZE,
            now,
            force: false,
        }
    }

    /// Leads whose last check is before this instant are eligible.
    pub fn cutoff(&self) -> String {
        db_timestamp(self.now - self.recheck_after)
    }
}

/// Insert a tracked lead, or refresh its campaign, status and vendor id.
pub async fn upsert_lead(pool: &SqlitePool, lead: &NewLeadState) -> Result<()> {
    let email = normalize_email(&lead.email)?;
    let now = db_timestamp(Utc::now());

    sqlx::query(
        r#"
        INSERT INTO ops_inst_state (email, campaign_id, status, instantly_lead_id, added_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(email) DO UPDATE SET
            campaign_id = excluded.campaign_id,
            status = excluded.status,
            instantly_lead_id = COALESCE(excluded.instantly_lead_id, ops_inst_state.instantly_lead_id),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&email)
    .bind(&lead.campaign_id)
    .bind(lead.status.as_str())
    .bind(&lead.instantly_lead_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a lead's state by email.
pub async fn get_lead(pool: &SqlitePool, email: &str) -> Result<LeadState> {
    let sql = format!(
        "SELECT {} FROM ops_inst_state WHERE email = ?",
        LEAD_STATE_COLUMNS
    );

    sqlx::query_as::<_, LeadState>(&sql)
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "Lead",
            id: email.to_string(),
        })
}

/// Select the next batch of leads to re-evaluate.
///
/// A lead qualifies when it is `active` or `pending`, belongs to one of the
/// given campaigns, and has never been checked or was last checked before
/// the recheck cutoff. Never-checked leads come first, then the stalest.
pub async fn select_drain_candidates(
    pool: &SqlitePool,
    query: &CandidateQuery,
) -> Result<Vec<DrainCandidate>> {
    if query.campaign_ids.is_empty() || query.batch_size == 0 {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT email, campaign_id, status, instantly_lead_id, last_drain_check \
         FROM ops_inst_state WHERE status IN (",
    );
    {
        let mut statuses = builder.separated(", ");
        for status in LeadStatus::DRAINABLE {
            statuses.push_bind(status.as_str());
        }
    }
    builder.push(") AND campaign_id IN (");
    {
        let mut campaigns = builder.separated(", ");
        for campaign_id in &query.campaign_ids {
            campaigns.push_bind(campaign_id.as_str());
        }
    }
    builder.push(")");

    if !query.force {
        builder
            .push(" AND (last_drain_check IS NULL OR last_drain_check < ")
            .push_bind(query.cutoff())
            .push(")");
    }

    builder
        .push(" ORDER BY COALESCE(last_drain_check, '1970-01-01 00:00:00') ASC, email ASC LIMIT ")
        .push_bind(i64::from(query.batch_size));

    let candidates = builder
        .build_query_as::<DrainCandidate>()
        .fetch_all(pool)
        .await?;

    tracing::debug!(
        "Selected {} drain candidates (force: {})",
        candidates.len(),
        query.force
    );

    Ok(candidates)
}

/// Record that a lead was evaluated and kept.
pub async fn stamp_drain_check(pool: &SqlitePool, email: &str, now: DateTime<Utc>) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE ops_inst_state
        SET last_drain_check = ?
        WHERE email = ?
        "#,
    )
    .bind(db_timestamp(now))
    .bind(email.trim().to_lowercase())
    .execute(pool)
    .await?;

    require_row(result.rows_affected(), email)
}

/// Record a terminal status after the vendor delete succeeded.
pub async fn record_disposition(
    pool: &SqlitePool,
    email: &str,
    status: LeadStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut conn = pool.acquire().await?;
    write_terminal_status(&mut *conn, &email.trim().to_lowercase(), status, now).await
}

/// Suppression entry written together with a drained lead.
#[derive(Debug, Clone, Copy)]
pub struct Suppression<'a> {
    pub source: &'a str,
    pub reason: &'a str,
    pub added_by: &'a str,
}

/// Everything recorded once the vendor confirmed a delete.
#[derive(Debug, Clone)]
pub struct DrainedLead<'a> {
    pub email: &'a str,
    pub campaign_id: &'a str,
    pub status: LeadStatus,
    /// Append a history row under this sequence name.
    pub history_sequence: Option<&'a str>,
    pub suppression: Option<Suppression<'a>>,
    pub drained_at: DateTime<Utc>,
}

/// Record a drained lead in one transaction: history row, suppression entry
/// and terminal status. Nothing is written if any part fails. An existing
/// suppression entry for the email is kept.
pub async fn record_drained(pool: &SqlitePool, drained: &DrainedLead<'_>) -> Result<()> {
    let email = normalize_email(drained.email)?;
    let mut tx = pool.begin().await?;

    if let Some(sequence_name) = drained.history_sequence {
        lead_history::append(
            &mut *tx,
            &email,
            drained.campaign_id,
            sequence_name,
            drained.status.as_str(),
            drained.drained_at,
        )
        .await?;
    }

    if let Some(suppression) = drained.suppression {
        let entry = do_not_contact::new_entry(
            &email,
            suppression.source,
            suppression.reason,
            suppression.added_by,
            drained.drained_at,
        )?;
        match do_not_contact::insert_entry(&mut *tx, &entry).await {
            Ok(()) | Err(DatabaseError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    write_terminal_status(&mut *tx, &email, drained.status, drained.drained_at).await?;

    tx.commit().await?;
    Ok(())
}

async fn write_terminal_status(
    conn: &mut SqliteConnection,
    email: &str,
    status: LeadStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let now = db_timestamp(now);
    let result = sqlx::query(
        r#"
        UPDATE ops_inst_state
        SET status = ?,
            updated_at = ?,
            last_drain_check = ?,
            deletion_status = 'deleted',
            last_deletion_attempt = ?
        WHERE email = ?
        "#,
    )
    .bind(status.as_str())
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .bind(email)
    .execute(&mut *conn)
    .await?;

    require_row(result.rows_affected(), email)
}

/// Store the vendor id found for a lead that had none.
pub async fn set_vendor_id(pool: &SqlitePool, email: &str, lead_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE ops_inst_state
        SET instantly_lead_id = ?
        WHERE email = ?
        "#,
    )
    .bind(lead_id)
    .bind(email.trim().to_lowercase())
    .execute(pool)
    .await?;

    require_row(result.rows_affected(), email)
}

/// Mark a lead the vendor no longer knows about.
pub async fn mark_missing(pool: &SqlitePool, email: &str, now: DateTime<Utc>) -> Result<()> {
    let now = db_timestamp(now);
    let result = sqlx::query(
        r#"
        UPDATE ops_inst_state
        SET status = ?, updated_at = ?, last_drain_check = ?
        WHERE email = ?
        "#,
    )
    .bind(LeadStatus::Missing.as_str())
    .bind(&now)
    .bind(&now)
    .bind(email.trim().to_lowercase())
    .execute(pool)
    .await?;

    require_row(result.rows_affected(), email)
}

/// Count a failed vendor delete. Leaves `last_drain_check` alone so the lead
/// is picked up again on the next run.
pub async fn record_deletion_failure(
    pool: &SqlitePool,
    email: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE ops_inst_state
        SET deletion_attempts = deletion_attempts + 1,
            deletion_status = 'failed',
            last_deletion_attempt = ?
        WHERE email = ?
        "#,
    )
    .bind(db_timestamp(now))
    .bind(email.trim().to_lowercase())
    .execute(pool)
    .await?;

    require_row(result.rows_affected(), email)
}

/// Count tracked leads per status.
pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let counts = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT status, COUNT(*)
        FROM ops_inst_state
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(counts)
}

/// Count `active`/`pending` leads in a campaign.
pub async fn count_drainable_in_campaign(pool: &SqlitePool, campaign_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM ops_inst_state
        WHERE campaign_id = ? AND status IN ('active', 'pending')
        "#,
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Count all tracked leads.
pub async fn count_tracked(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ops_inst_state")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

fn require_row(rows_affected: u64, email: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Lead",
            id: email.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::TimeZone;

    const SMB: &str = "camp-smb";
    const MID: &str = "camp-mid";

    async fn test_db() -> Database {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 15, 12, 0, 0).unwrap()
    }

    async fn track(db: &Database, email: &str, campaign: &str) {
        let lead = NewLeadState::active(email, campaign, format!("id-{}", email));
        upsert_lead(db.pool(), &lead).await.unwrap();
    }

    fn query() -> CandidateQuery {
        CandidateQuery::new(vec![SMB.to_string(), MID.to_string()], now())
    }

    #[tokio::test]
    async fn test_never_checked_leads_come_first() {
        let db = test_db().await;
        track(&db, "b@example.com", SMB).await;
        track(&db, "a@example.com", MID).await;
        track(&db, "old@example.com", SMB).await;
        stamp_drain_check(db.pool(), "old@example.com", now() - Duration::days(3))
            .await
            .unwrap();

        let candidates = select_drain_candidates(db.pool(), &query()).await.unwrap();
        let emails: Vec<_> = candidates.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["a@example.com", "b@example.com", "old@example.com"]);
    }

    #[tokio::test]
    async fn test_recently_checked_leads_are_skipped() {
        let db = test_db().await;
        track(&db, "fresh@example.com", SMB).await;
        track(&db, "stale@example.com", SMB).await;
        stamp_drain_check(db.pool(), "fresh@example.com", now() - Duration::hours(23))
            .await
            .unwrap();
        stamp_drain_check(db.pool(), "stale@example.com", now() - Duration::hours(25))
            .await
            .unwrap();

        let candidates = select_drain_candidates(db.pool(), &query()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].email, "stale@example.com");

        let forced = CandidateQuery { force: true, ..query() };
        let candidates = select_drain_candidates(db.pool(), &forced).await.unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_and_untracked_leads_are_excluded() {
        let db = test_db().await;
        track(&db, "done@example.com", SMB).await;
        track(&db, "elsewhere@example.com", "camp-other").await;
        track(&db, "pending@example.com", MID).await;
        record_disposition(db.pool(), "done@example.com", LeadStatus::Completed, now())
            .await
            .unwrap();
        let pending = NewLeadState {
            status: LeadStatus::Pending,
            ..NewLeadState::active("pending@example.com", MID, "id-p")
        };
        upsert_lead(db.pool(), &pending).await.unwrap();

        let forced = CandidateQuery { force: true, ..query() };
        let candidates = select_drain_candidates(db.pool(), &forced).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].email, "pending@example.com");
        assert_eq!(candidates[0].status, "pending");
    }

    #[tokio::test]
    async fn test_batch_size_caps_results() {
        let db = test_db().await;
        for i in 0..5 {
            track(&db, &format!("lead{}@example.com", i), SMB).await;
        }

        let capped = CandidateQuery { batch_size: 2, ..query() };
        let candidates = select_drain_candidates(db.pool(), &capped).await.unwrap();
        assert_eq!(candidates.len(), 2);

        let none = CandidateQuery::new(Vec::new(), now());
        assert!(select_drain_candidates(db.pool(), &none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_failure_does_not_stamp() {
        let db = test_db().await;
        track(&db, "stuck@example.com", SMB).await;

        record_deletion_failure(db.pool(), "stuck@example.com", now()).await.unwrap();
        record_deletion_failure(db.pool(), "stuck@example.com", now()).await.unwrap();

        let state = get_lead(db.pool(), "stuck@example.com").await.unwrap();
        assert_eq!(state.deletion_attempts, 2);
        assert_eq!(state.deletion_status.as_deref(), Some("failed"));
        assert!(state.last_drain_check.is_none());
        assert_eq!(state.lead_status(), Some(LeadStatus::Active));
    }

    #[tokio::test]
    async fn test_record_disposition_and_missing() {
        let db = test_db().await;
        track(&db, "gone@example.com", SMB).await;
        track(&db, "replied@example.com", SMB).await;

        mark_missing(db.pool(), "gone@example.com", now()).await.unwrap();
        record_disposition(db.pool(), "replied@example.com", LeadStatus::Replied, now())
            .await
            .unwrap();

        let gone = get_lead(db.pool(), "gone@example.com").await.unwrap();
        assert_eq!(gone.lead_status(), Some(LeadStatus::Missing));
        assert_eq!(gone.last_drain_check.as_deref(), Some("2025-09-15 12:00:00"));
        assert!(gone.deletion_status.is_none());

        let replied = get_lead(db.pool(), "replied@example.com").await.unwrap();
        assert_eq!(replied.status, "replied");
        assert_eq!(replied.deletion_status.as_deref(), Some("deleted"));

        let counts = count_by_status(db.pool()).await.unwrap();
        assert_eq!(
            counts,
            vec![("missing".to_string(), 1), ("replied".to_string(), 1)]
        );
        assert_eq!(count_drainable_in_campaign(db.pool(), SMB).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_updates_on_unknown_lead_fail() {
        let db = test_db().await;
        let result = stamp_drain_check(db.pool(), "ghost@example.com", now()).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    const UNSUBSCRIBE: Suppression<'static> = Suppression {
        source: "instantly_drain",
        reason: "unsubscribe_via_api",
        added_by: "lead_drain",
    };

    fn drained(email: &str, status: LeadStatus) -> DrainedLead<'_> {
        DrainedLead {
            email,
            campaign_id: SMB,
            status,
            history_sequence: None,
            suppression: None,
            drained_at: now(),
        }
    }

    #[tokio::test]
    async fn test_record_drained_writes_history_and_status() {
        let db = test_db().await;
        track(&db, "Replied@Example.com", SMB).await;

        let lead = DrainedLead {
            history_sequence: Some("SMB"),
            ..drained("replied@example.com", LeadStatus::Replied)
        };
        record_drained(db.pool(), &lead).await.unwrap();

        let state = get_lead(db.pool(), "replied@example.com").await.unwrap();
        assert_eq!(state.lead_status(), Some(LeadStatus::Replied));
        assert_eq!(state.deletion_status.as_deref(), Some("deleted"));
        assert_eq!(state.last_drain_check.as_deref(), Some("2025-09-15 12:00:00"));

        let history = lead_history::history_for(db.pool(), "replied@example.com").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status_final, "replied");
        assert_eq!(history[0].sequence_name, "SMB");
        assert!(!do_not_contact::is_suppressed(db.pool(), "replied@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_drained_keeps_existing_suppression() {
        let db = test_db().await;
        track(&db, "quit@example.com", SMB).await;
        do_not_contact::add_to_dnc(db.pool(), "quit@example.com", "manual", "asked", "ops", now())
            .await
            .unwrap();

        let lead = DrainedLead {
            suppression: Some(UNSUBSCRIBE),
            ..drained("quit@example.com", LeadStatus::Unsubscribed)
        };
        record_drained(db.pool(), &lead).await.unwrap();

        let entry = do_not_contact::get_entry(db.pool(), "quit@example.com").await.unwrap().unwrap();
        assert_eq!(entry.source, "manual");
        let state = get_lead(db.pool(), "quit@example.com").await.unwrap();
        assert_eq!(state.lead_status(), Some(LeadStatus::Unsubscribed));
    }

    #[tokio::test]
    async fn test_record_drained_rolls_back_on_failure() {
        let db = test_db().await;

        // No state row: the status write fails after history and DNC were inserted
        let lead = DrainedLead {
            history_sequence: Some("SMB"),
            suppression: Some(UNSUBSCRIBE),
            ..drained("untracked@example.com", LeadStatus::Completed)
        };
        let result = record_drained(db.pool(), &lead).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));

        assert!(lead_history::history_for(db.pool(), "untracked@example.com").await.unwrap().is_empty());
        assert!(do_not_contact::get_entry(db.pool(), "untracked@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_vendor_id() {
        let db = test_db().await;
        let lead = NewLeadState {
            instantly_lead_id: None,
            ..NewLeadState::active("noid@example.com", SMB, "unused")
        };
        upsert_lead(db.pool(), &lead).await.unwrap();
        assert!(get_lead(db.pool(), "noid@example.com").await.unwrap().instantly_lead_id.is_none());

        set_vendor_id(db.pool(), "NoId@example.com", "id-found").await.unwrap();
        let state = get_lead(db.pool(), "noid@example.com").await.unwrap();
        assert_eq!(state.instantly_lead_id.as_deref(), Some("id-found"));

        let result = set_vendor_id(db.pool(), "ghost@example.com", "id-x").await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_email() {
        let db = test_db().await;
        let lead = NewLeadState::active("not-an-email", SMB, "id");
        let result = upsert_lead(db.pool(), &lead).await;
        assert!(matches!(result, Err(DatabaseError::Invalid(_))));
    }
}
