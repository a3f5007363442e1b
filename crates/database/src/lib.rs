//! SQLite state store for the lead drain.
//!
//! This crate tracks lead state, final dispositions, failed operations and the
//! suppression list using SQLx with SQLite.
//!
//! # Example
//!
//! ```no_run
//! use database::{lead_state, Database, NewLeadState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:lead-drain.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     // Track a lead
//!     let lead = NewLeadState::active(
//!         "info@madelines.co",
//!         "8c46e0c9-c1f9-4201-a8d6-6221bafeada6",
//!         "2f1d9a4e-0000-4000-8000-000000000001",
//!     );
//!     lead_state::upsert_lead(db.pool(), &lead).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dead_letter;
pub mod do_not_contact;
pub mod error;
pub mod lead_history;
pub mod lead_state;
pub mod models;
pub mod validation;

pub use error::{DatabaseError, Result};
pub use lead_state::{CandidateQuery, DrainedLead, Suppression};
pub use models::{
    db_timestamp, parse_db_timestamp, DeadLetter, DoNotContact, DrainCandidate, LeadHistoryEntry,
    LeadState, LeadStatus, NewLeadState,
};
pub use validation::ValidationError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size for database connections.
    const DEFAULT_POOL_SIZE: u32 = 20;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `?mode=rwc` to create the database file if it doesn't exist.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> database::Result<()> {
    /// // File database
    /// let db = database::Database::connect("sqlite:data/lead-drain.db?mode=rwc").await?;
    ///
    /// // In-memory database (for testing)
    /// let db = database::Database::connect("sqlite::memory:").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    ///
    /// In-memory URLs get a single connection, since every connection to
    /// `sqlite::memory:` opens its own empty database.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_size = if url.contains(":memory:") { 1 } else { pool_size };

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            "Connected to database: {} (pool size: {})",
            url,
            pool_size
        );

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// This should be called once after connecting to ensure the schema is up to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
