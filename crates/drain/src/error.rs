//! Error types for drain operations.

use instantly_client::InstantlyError;
use lead_store::DatabaseError;
use thiserror::Error;

/// Errors that can occur while draining leads.
#[derive(Debug, Error)]
pub enum DrainError {
    /// Vendor API call failed.
    #[error("instantly api error: {0}")]
    Api(#[from] InstantlyError),

    /// State store operation failed.
    #[error("state store error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration was invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while reading drain configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    /// No campaign is tracked.
    #[error("no tracked campaigns configured")]
    NoCampaigns,
}
