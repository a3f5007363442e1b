//! Dead letters: failed vendor and store operations.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{db_timestamp, DeadLetter};

/// Error and payload are each cut to this many characters.
pub const MAX_DEAD_LETTER_FIELD: usize = 500;

/// A failure to record.
#[derive(Debug, Clone, Default)]
pub struct NewDeadLetter<'a> {
    pub phase: &'a str,
    pub email: Option<&'a str>,
    pub http_status: Option<u16>,
    pub error: &'a str,
    /// Request or context that failed, if any.
    pub payload: Option<&'a str>,
    pub retry_count: u32,
}

/// Record a dead letter. Returns its id.
pub async fn log_dead_letter(
    pool: &SqlitePool,
    letter: &NewDeadLetter<'_>,
    occurred_at: DateTime<Utc>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let error_text = dead_letter_text(letter.error, letter.payload);

    sqlx::query(
        r#"
        INSERT INTO ops_dead_letters (id, occurred_at, phase, email, http_status, error_text, retry_count)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(db_timestamp(occurred_at))
    .bind(letter.phase)
    .bind(letter.email)
    .bind(letter.http_status.map(i64::from))
    .bind(&error_text)
    .bind(i64::from(letter.retry_count.max(1)))
    .execute(pool)
    .await?;

    tracing::warn!(
        "Dead letter {} in phase {}: {}",
        id,
        letter.phase,
        truncate(letter.error, 120)
    );

    Ok(id)
}

/// Most recent dead letters, newest first.
pub async fn recent_dead_letters(pool: &SqlitePool, limit: u32) -> Result<Vec<DeadLetter>> {
    let letters = sqlx::query_as::<_, DeadLetter>(
        r#"
        SELECT id, occurred_at, phase, email, http_status, error_text, retry_count
        FROM ops_dead_letters
        ORDER BY occurred_at DESC, id
        LIMIT ?
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    Ok(letters)
}

/// Dead letters recorded on a given UTC day.
pub async fn dead_letters_for_day(pool: &SqlitePool, day: NaiveDate) -> Result<Vec<DeadLetter>> {
    let letters = sqlx::query_as::<_, DeadLetter>(
        r#"
        SELECT id, occurred_at, phase, email, http_status, error_text, retry_count
        FROM ops_dead_letters
        WHERE substr(occurred_at, 1, 10) = ?
        ORDER BY occurred_at
        "#,
    )
    .bind(day.format("%Y-%m-%d").to_string())
    .fetch_all(pool)
    .await?;

    Ok(letters)
}

/// Stored error text: `"<error> | Payload: <payload>"`, each part truncated.
pub fn dead_letter_text(error: &str, payload: Option<&str>) -> String {
    let error = truncate(error, MAX_DEAD_LETTER_FIELD);
    match payload {
        Some(payload) => format!(
            "{} | Payload: {}",
            error,
            truncate(payload, MAX_DEAD_LETTER_FIELD)
        ),
        None => error,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
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

    #[test]
    fn test_dead_letter_text_truncates_each_part() {
        let long = "x".repeat(800);
        let text = dead_letter_text(&long, Some(&long));
        assert_eq!(text.len(), 500 + " | Payload: ".len() + 500);
        assert_eq!(dead_letter_text("boom", None), "boom");
    }

    #[tokio::test]
    async fn test_log_and_list_dead_letters() {
        let db = test_db().await;
        let day_one = Utc.with_ymd_and_hms(2025, 9, 1, 10, 0, 0).unwrap();
        let day_two = Utc.with_ymd_and_hms(2025, 9, 2, 10, 0, 0).unwrap();

        let lookup = NewDeadLetter {
            phase: "drain_lookup",
            email: Some("a@example.com"),
            http_status: Some(500),
            error: "server error",
            payload: Some("lead_id=abc"),
            retry_count: 1,
        };
        log_dead_letter(db.pool(), &lookup, day_one).await.unwrap();

        let delete = NewDeadLetter {
            phase: "drain_delete",
            error: "rate limited",
            ..Default::default()
        };
        log_dead_letter(db.pool(), &delete, day_two).await.unwrap();

        let recent = recent_dead_letters(db.pool(), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].phase, "drain_delete");
        assert_eq!(recent[0].retry_count, 1);
        assert_eq!(recent[1].http_status, Some(500));
        assert_eq!(recent[1].error_text, "server error | Payload: lead_id=abc");

        let first_day = dead_letters_for_day(db.pool(), day_one.date_naive()).await.unwrap();
        assert_eq!(first_day.len(), 1);
        assert_eq!(first_day[0].email.as_deref(), Some("a@example.com"));
    }
}
