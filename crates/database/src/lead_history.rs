//! Append-only lead history and the re-contact cooldown.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::Result;
use crate::models::{db_timestamp, parse_db_timestamp, LeadHistoryEntry};
use crate::validation::normalize_email;

/// Days after a final disposition before an email may be contacted again.
pub const DEFAULT_COOLDOWN_DAYS: i64 = 90;

/// Append a final disposition. Returns the attempt number it was stored with.
pub async fn record_completion(
    pool: &SqlitePool,
    email: &str,
    campaign_id: &str,
    sequence_name: &str,
    status_final: &str,
    completed_at: DateTime<Utc>,
) -> Result<i64> {
    let email = normalize_email(email)?;
    let mut tx = pool.begin().await?;
    let attempt_num = append(&mut *tx, &email, campaign_id, sequence_name, status_final, completed_at).await?;
    tx.commit().await?;

    Ok(attempt_num)
}

/// Insert a history row numbered after the email's existing rows.
///
/// `email` must already be normalized. Run inside a transaction so the count
/// and the insert see the same rows.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    email: &str,
    campaign_id: &str,
    sequence_name: &str,
    status_final: &str,
    completed_at: DateTime<Utc>,
) -> Result<i64> {
    let previous = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM ops_lead_history WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_one(&mut *conn)
    .await?;
    let attempt_num = previous + 1;

    sqlx::query(
        r#"
        INSERT INTO ops_lead_history (email, campaign_id, sequence_name, status_final, completed_at, attempt_num)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(email)
    .bind(campaign_id)
    .bind(sequence_name)
    .bind(status_final)
    .bind(db_timestamp(completed_at))
    .bind(attempt_num)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        "Recorded {} for {} (attempt {})",
        status_final,
        email,
        attempt_num
    );

    Ok(attempt_num)
}

/// All history rows for an email, newest first.
pub async fn history_for(pool: &SqlitePool, email: &str) -> Result<Vec<LeadHistoryEntry>> {
    let entries = sqlx::query_as::<_, LeadHistoryEntry>(
        r#"
        SELECT id, email, campaign_id, sequence_name, status_final, completed_at, attempt_num
        FROM ops_lead_history
        WHERE email = ?
        ORDER BY completed_at DESC, id DESC
        "#,
    )
    .bind(email.trim().to_lowercase())
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// The most recent history row for an email, if any.
pub async fn latest_completion(pool: &SqlitePool, email: &str) -> Result<Option<LeadHistoryEntry>> {
    let entry = sqlx::query_as::<_, LeadHistoryEntry>(
        r#"
        SELECT id, email, campaign_id, sequence_name, status_final, completed_at, attempt_num
        FROM ops_lead_history
        WHERE email = ?
        ORDER BY completed_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;

    Ok(entry)
}

/// Whether the email finished a sequence less than `cooldown` ago.
pub async fn is_in_cooldown(
    pool: &SqlitePool,
    email: &str,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<bool> {
    let Some(latest) = latest_completion(pool, email).await? else {
        return Ok(false);
    };

    Ok(match parse_db_timestamp(&latest.completed_at) {
        Some(completed_at) => now - completed_at < cooldown,
        // Unreadable timestamp: block re-contact rather than guess.
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::TimeZone;

    async fn test_db() -> Database {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_attempt_numbers_count_up() {
        let db = test_db().await;

        let first = record_completion(db.pool(), "a@example.com", "camp", "SMB", "completed", at(1))
            .await
            .unwrap();
        let second = record_completion(db.pool(), "A@example.com", "camp", "SMB", "replied", at(2))
            .await
            .unwrap();
        let other = record_completion(db.pool(), "b@example.com", "camp", "Midsize", "completed", at(2))
            .await
            .unwrap();

        assert_eq!((first, second, other), (1, 2, 1));

        let history = history_for(db.pool(), "a@example.com").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status_final, "replied");
        assert_eq!(history[0].attempt_num, 2);
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let db = test_db().await;
        let cooldown = Duration::days(DEFAULT_COOLDOWN_DAYS);

        assert!(!is_in_cooldown(db.pool(), "a@example.com", at(1), cooldown).await.unwrap());

        record_completion(db.pool(), "a@example.com", "camp", "SMB", "completed", at(1))
            .await
            .unwrap();

        assert!(is_in_cooldown(db.pool(), "a@example.com", at(1) + Duration::days(89), cooldown)
            .await
            .unwrap());
        assert!(!is_in_cooldown(db.pool(), "a@example.com", at(1) + Duration::days(90), cooldown)
            .await
            .unwrap());
    }
}
