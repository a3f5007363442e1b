//! Lead drain for Instantly cold-email campaigns.
//!
//! This crate decides which leads should leave their campaign and applies
//! those decisions against the vendor and the state store.
//!
//! # Architecture
//!
//! ```text
//! state store (ops_inst_state)
//!          ↓  select_drain_candidates (recheck window, batch size)
//! ┌──────────────────────────────────────────────┐
//! │                 DRAIN RUNNER                 │
//! │                                              │
//! │  1. Look up the lead at the vendor           │
//! │         ↓                                    │
//! │  2. classify → Keep(reason) | Drain(kind)    │
//! │         ↓                                    │
//! │  3. Keep  → stamp last_drain_check           │
//! │     Drain → delete, then history / DNC /     │
//! │             terminal status                  │
//! │     Error → dead letter, retried next run    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use drain::{DrainConfig, DrainRunner};
//! use instantly_client::{ClientConfig, InstantlyClient};
//! use lead_store::Database;
//!
//! let config = DrainConfig::from_env()?;
//! let db = Database::connect(&config.database_url).await?;
//! db.migrate().await?;
//!
//! let client = InstantlyClient::new(ClientConfig::from_env()?)?;
//! let runner = DrainRunner::new(client, db, config);
//! let report = runner.run().await?;
//! report.log_summary();
//! ```

pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod mock;
pub mod reports;
pub mod runner;

pub use api::LeadApi;
pub use classify::{classify, classify_value, classify_with, Disposition, DrainDecision, KeepReason};
pub use config::{DrainConfig, DrainThresholds, FeatureFlags, TrackedCampaign};
pub use error::{ConfigError, DrainError};
pub use mock::{MockCalls, MockLeadApi};
pub use reports::{
    find_orphans, inventory, log_email, mask_email, missing_campaigns, CampaignInventory,
    OrphanReport,
};
pub use runner::{
    inspect, ClassificationCounts, DrainReport, DrainRunner, InspectedLead, LeadAction, LeadOutcome,
};
