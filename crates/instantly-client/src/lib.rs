//! Instantly.ai API client library.
//!
//! This crate provides a Rust client for the Instantly v2 REST API. It supports:
//!
//! - Listing, searching, fetching, creating, moving and deleting leads
//! - Listing and fetching campaigns
//! - Walking cursor-paginated endpoints with retry, caching and a page cap
//!
//! # Example
//!
//! ```no_run
//! use instantly_client::{ClientConfig, CursorPaginator, InstantlyClient, PaginationOptions};
//!
//! # async fn example() -> Result<(), instantly_client::InstantlyError> {
//! let config = ClientConfig::from_env()?;
//! let client = InstantlyClient::new(config)?;
//!
//! // Fetch a single lead
//! if let Some(lead) = client.get_lead("0b4a7c1e-lead-id").await? {
//!     println!("{} has status {}", lead.email, lead.status);
//! }
//!
//! // Walk every lead in a campaign
//! let paginator = CursorPaginator::new(client.clone());
//! let (leads, stats) = paginator
//!     .fetch_all_leads(Some("8c46e0c9-campaign-id"), &PaginationOptions::default())
//!     .await;
//! println!("{} leads in {} pages", leads.len(), stats.total_pages);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod pagination;
pub mod retry;
pub mod types;

pub use client::InstantlyClient;
pub use config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_CREDENTIALS_PATH};
pub use error::InstantlyError;
pub use pagination::{
    CacheStats, CursorPaginator, PageSource, PaginationOptions, PaginationStats,
    DEFAULT_CACHE_TTL, LEADS_LIST_ENDPOINT,
};
pub use retry::RetryPolicy;
pub use types::*;

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
