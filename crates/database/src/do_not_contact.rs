//! Permanent do-not-contact list.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::models::{db_timestamp, DoNotContact};
use crate::validation::{email_domain, normalize_email};

/// Suppress an email permanently.
pub async fn add_to_dnc(
    pool: &SqlitePool,
    email: &str,
    source: &str,
    reason: &str,
    added_by: &str,
    added_at: DateTime<Utc>,
) -> Result<DoNotContact> {
    let entry = new_entry(email, source, reason, added_by, added_at)?;
    let mut conn = pool.acquire().await?;
    insert_entry(&mut *conn, &entry).await?;
    Ok(entry)
}

/// Build an active entry for `email`.
pub(crate) fn new_entry(
    email: &str,
    source: &str,
    reason: &str,
    added_by: &str,
    added_at: DateTime<Utc>,
) -> Result<DoNotContact> {
    let email = normalize_email(email)?;
    Ok(DoNotContact {
        id: Uuid::new_v4().to_string(),
        domain: email_domain(&email),
        email,
        source: source.to_string(),
        reason: reason.to_string(),
        added_at: db_timestamp(added_at),
        added_by: added_by.to_string(),
        is_active: true,
    })
}

/// Insert an entry. An existing entry for the email is `AlreadyExists`.
pub(crate) async fn insert_entry(conn: &mut SqliteConnection, entry: &DoNotContact) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ops_do_not_contact (id, email, domain, source, reason, added_at, added_by, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.email)
    .bind(&entry.domain)
    .bind(&entry.source)
    .bind(&entry.reason)
    .bind(&entry.added_at)
    .bind(&entry.added_by)
    .bind(entry.is_active)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return DatabaseError::AlreadyExists {
                    entity: "DoNotContact",
                    id: entry.email.clone(),
                };
            }
        }
        DatabaseError::Sqlx(e)
    })?;

    Ok(())
}

/// Get the suppression entry for an email, active or not.
pub async fn get_entry(pool: &SqlitePool, email: &str) -> Result<Option<DoNotContact>> {
    let entry = sqlx::query_as::<_, DoNotContact>(
        r#"
        SELECT id, email, domain, source, reason, added_at, added_by, is_active
        FROM ops_do_not_contact
        WHERE email = ?
        "#,
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;

    Ok(entry)
}

/// Whether an email has an active suppression entry.
pub async fn is_suppressed(pool: &SqlitePool, email: &str) -> Result<bool> {
    Ok(get_entry(pool, email)
        .await?
        .map(|entry| entry.is_active)
        .unwrap_or(false))
}
