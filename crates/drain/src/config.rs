//! Drain configuration.

use std::env;
use std::time::Duration;

use instantly_client::RetryPolicy;
use lead_store::lead_history::DEFAULT_COOLDOWN_DAYS;
use lead_store::lead_state::{DEFAULT_BATCH_SIZE, DEFAULT_RECHECK_HOURS};

use crate::error::ConfigError;

/// Default SMB campaign id.
pub const DEFAULT_SMB_CAMPAIGN_ID: &str = "8c46e0c9-c1f9-4201-a8d6-6221bafeada6";

/// Default Midsize campaign id.
pub const DEFAULT_MIDSIZE_CAMPAIGN_ID: &str = "5ffbe8c3-dc0e-41e4-9999-48f00d2015df";

/// Default state store location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/lead-drain.db?mode=rwc";

/// A campaign whose leads the drain manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedCampaign {
    pub id: String,
    /// Sequence name written to lead history ("SMB", "Midsize").
    pub name: String,
}

impl TrackedCampaign {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Age thresholds used by the classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainThresholds {
    /// Days a hard bounce is kept before it is drained.
    pub hard_bounce_grace_days: i64,
    /// Days after which an active lead is considered stuck.
    pub stale_active_days: i64,
}

impl Default for DrainThresholds {
    fn default() -> Self {
        Self {
            hard_bounce_grace_days: 7,
            stale_active_days: 90,
        }
    }
}

/// Feature flags, each overridable with `FEATURE_<NAME>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Mask email addresses in log output.
    pub mask_emails_in_logs: bool,
    /// Key set to use: `production`, `staging` or `dev`.
    pub api_env: String,
    /// Ignore the recheck window when selecting candidates.
    pub force_drain_check: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            mask_emails_in_logs: true,
            api_env: "production".to_string(),
            force_drain_check: false,
        }
    }
}

impl FeatureFlags {
    /// Environment variable that overrides a flag.
    pub fn env_key(flag: &str) -> String {
        format!("FEATURE_{}", flag.to_uppercase().replace('.', "_"))
    }

    /// Read flag overrides through `lookup`, keeping defaults for unset flags.
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |name: &str| lookup(&Self::env_key(name));

        Self {
            mask_emails_in_logs: flag("mask_emails_in_logs")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.mask_emails_in_logs),
            api_env: flag("api_env")
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.api_env),
            force_drain_check: flag("force_drain_check")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.force_drain_check),
        }
    }
}

/// Configuration for a drain run.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// SQLx SQLite URL of the state store.
    pub database_url: String,
    /// Classify and report without writing or deleting.
    pub dry_run: bool,
    /// Maximum candidates per run.
    pub batch_size: u32,
    /// Stop after this many evaluations (0 = unlimited).
    pub max_leads_to_evaluate: u32,
    /// Leads checked more recently than this are not re-evaluated.
    pub recheck_after: chrono::Duration,
    /// Sleep before each vendor lookup.
    pub lookup_delay: Duration,
    /// Sleep before each vendor delete.
    pub delete_delay: Duration,
    /// Sleep between pages when walking vendor lists.
    pub pagination_delay: Duration,
    pub campaigns: Vec<TrackedCampaign>,
    pub thresholds: DrainThresholds,
    /// Re-contact cooldown after a final disposition.
    pub cooldown: chrono::Duration,
    /// Retry policy for vendor deletes.
    pub delete_retry: RetryPolicy,
    pub flags: FeatureFlags,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            dry_run: true,
            batch_size: DEFAULT_BATCH_SIZE,
            max_leads_to_evaluate: 0,
            recheck_after: chrono::Duration::hours(DEFAULT_RECHECK_HOURS),
            lookup_delay: Duration::from_millis(500),
            delete_delay: Duration::from_secs(3),
            pagination_delay: Duration::from_secs(1),
            campaigns: vec![
                TrackedCampaign::new(DEFAULT_SMB_CAMPAIGN_ID, "SMB"),
                TrackedCampaign::new(DEFAULT_MIDSIZE_CAMPAIGN_ID, "Midsize"),
            ],
            thresholds: DrainThresholds::default(),
            cooldown: chrono::Duration::days(DEFAULT_COOLDOWN_DAYS),
            delete_retry: RetryPolicy::default(),
            flags: FeatureFlags::default(),
        }
    }
}

impl DrainConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `DATABASE_URL` | SQLx SQLite URL | `sqlite:data/lead-drain.db?mode=rwc` |
    /// | `SQLITE_PATH` | Database file path, used when `DATABASE_URL` is unset | - |
    /// | `DRY_RUN` | `false` applies decisions | `true` |
    /// | `DRAIN_BATCH_SIZE` | Candidates per run | `50` |
    /// | `MAX_LEADS_TO_EVALUATE` | Evaluation cap, 0 = unlimited | `0` |
    /// | `DRAIN_RECHECK_HOURS` | Recheck window | `24` |
    /// | `LOOKUP_DELAY_MS` | Sleep before each lookup | `500` |
    /// | `DELETE_DELAY_MS` | Sleep before each delete | `3000` |
    /// | `PAGINATION_DELAY_MS` | Sleep between list pages | `1000` |
    /// | `SMB_CAMPAIGN_ID` | SMB campaign | `8c46e0c9-...` |
    /// | `MIDSIZE_CAMPAIGN_ID` | Midsize campaign | `5ffbe8c3-...` |
    /// | `FEATURE_<FLAG>` | Feature flag overrides | see [`FeatureFlags`] |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                lookup("SQLITE_PATH")
                    .filter(|v| !v.trim().is_empty())
                    .map(|path| format!("sqlite:{}?mode=rwc", path))
            })
            .unwrap_or(defaults.database_url);

        let dry_run = match lookup("DRY_RUN") {
            Some(value) => parse_flag(&value),
            None => defaults.dry_run,
        };

        let batch_size = parse_var(&lookup, "DRAIN_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        let max_leads_to_evaluate =
            parse_var(&lookup, "MAX_LEADS_TO_EVALUATE")?.unwrap_or(defaults.max_leads_to_evaluate);
        let recheck_after = parse_var::<i64, _>(&lookup, "DRAIN_RECHECK_HOURS")?
            .map(chrono::Duration::hours)
            .unwrap_or(defaults.recheck_after);

        let lookup_delay = parse_millis(&lookup, "LOOKUP_DELAY_MS")?.unwrap_or(defaults.lookup_delay);
        let delete_delay = parse_millis(&lookup, "DELETE_DELAY_MS")?.unwrap_or(defaults.delete_delay);
        let pagination_delay =
            parse_millis(&lookup, "PAGINATION_DELAY_MS")?.unwrap_or(defaults.pagination_delay);

        let smb = lookup("SMB_CAMPAIGN_ID")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SMB_CAMPAIGN_ID.to_string());
        let midsize = lookup("MIDSIZE_CAMPAIGN_ID")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIDSIZE_CAMPAIGN_ID.to_string());

        let config = Self {
            database_url,
            dry_run,
            batch_size,
            max_leads_to_evaluate,
            recheck_after,
            lookup_delay,
            delete_delay,
            pagination_delay,
            campaigns: vec![
                TrackedCampaign::new(smb.trim(), "SMB"),
                TrackedCampaign::new(midsize.trim(), "Midsize"),
            ],
            flags: FeatureFlags::from_lookup(&lookup),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runner cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.campaigns.is_empty() {
            return Err(ConfigError::NoCampaigns);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "DRAIN_BATCH_SIZE".to_string(),
                value: "0".to_string(),
            });
        }
        if self.recheck_after < chrono::Duration::zero() {
            return Err(ConfigError::InvalidValue {
                name: "DRAIN_RECHECK_HOURS".to_string(),
                value: self.recheck_after.num_hours().to_string(),
            });
        }
        Ok(())
    }

    /// Ids of the tracked campaigns.
    pub fn campaign_ids(&self) -> Vec<String> {
        self.campaigns.iter().map(|c| c.id.clone()).collect()
    }

    /// Tracked campaign by id.
    pub fn campaign(&self, campaign_id: &str) -> Option<&TrackedCampaign> {
        self.campaigns.iter().find(|c| c.id == campaign_id)
    }

    /// Sequence name for history rows. Untracked campaigns fall back to "Midsize".
    pub fn sequence_name(&self, campaign_id: &str) -> &str {
        self.campaign(campaign_id)
            .map(|c| c.name.as_str())
            .unwrap_or("Midsize")
    }

    /// Candidate selection ignores the recheck window.
    pub fn force_drain_check(&self) -> bool {
        self.flags.force_drain_check
    }

    /// A copy with every sleep removed.
    pub fn without_delays(mut self) -> Self {
        self.lookup_delay = Duration::ZERO;
        self.delete_delay = Duration::ZERO;
        self.pagination_delay = Duration::ZERO;
        self.delete_retry = RetryPolicy::immediate(self.delete_retry.max_attempts);
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
    }
}

fn parse_millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<u64, _>(lookup, name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DrainConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_leads_to_evaluate, 0);
        assert_eq!(config.recheck_after, chrono::Duration::hours(24));
        assert_eq!(config.cooldown, chrono::Duration::days(90));
        assert_eq!(config.thresholds, DrainThresholds::default());
        assert_eq!(config.campaign_ids(), vec![DEFAULT_SMB_CAMPAIGN_ID, DEFAULT_MIDSIZE_CAMPAIGN_ID]);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.flags.mask_emails_in_logs);
        assert!(!config.force_drain_check());
    }

    #[test]
    fn test_overrides() {
        let config = DrainConfig::from_lookup(lookup(&[
            ("DRY_RUN", "false"),
            ("DRAIN_BATCH_SIZE", "10"),
            ("MAX_LEADS_TO_EVALUATE", "3"),
            ("DRAIN_RECHECK_HOURS", "6"),
            ("LOOKUP_DELAY_MS", "0"),
            ("SQLITE_PATH", "/tmp/drain.db"),
            ("SMB_CAMPAIGN_ID", "smb-test"),
            ("FEATURE_FORCE_DRAIN_CHECK", "yes"),
            ("FEATURE_MASK_EMAILS_IN_LOGS", "0"),
            ("FEATURE_API_ENV", "Staging"),
        ]))
        .unwrap();

        assert!(!config.dry_run);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_leads_to_evaluate, 3);
        assert_eq!(config.recheck_after, chrono::Duration::hours(6));
        assert_eq!(config.lookup_delay, Duration::ZERO);
        assert_eq!(config.database_url, "sqlite:/tmp/drain.db?mode=rwc");
        assert_eq!(config.sequence_name("smb-test"), "SMB");
        assert_eq!(config.sequence_name(DEFAULT_MIDSIZE_CAMPAIGN_ID), "Midsize");
        assert!(config.force_drain_check());
        assert!(!config.flags.mask_emails_in_logs);
        assert_eq!(config.flags.api_env, "staging");
    }

    #[test]
    fn test_database_url_wins_over_sqlite_path() {
        let config = DrainConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("SQLITE_PATH", "/tmp/ignored.db"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = DrainConfig::from_lookup(lookup(&[("DRAIN_BATCH_SIZE", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "DRAIN_BATCH_SIZE".to_string(),
                value: "many".to_string()
            }
        );

        assert!(DrainConfig::from_lookup(lookup(&[("DRAIN_BATCH_SIZE", "0")])).is_err());
        assert!(DrainConfig::from_lookup(lookup(&[("DELETE_DELAY_MS", "-1")])).is_err());
    }

    #[test]
    fn test_feature_flag_env_key() {
        assert_eq!(FeatureFlags::env_key("force_drain_check"), "FEATURE_FORCE_DRAIN_CHECK");
        assert_eq!(
            FeatureFlags::env_key("security.mask_emails_in_logs"),
            "FEATURE_SECURITY_MASK_EMAILS_IN_LOGS"
        );
    }

    #[test]
    fn test_without_delays() {
        let config = DrainConfig::default().without_delays();
        assert_eq!(config.delete_delay, Duration::ZERO);
        assert_eq!(config.delete_retry.delay_for_attempt(2), Duration::ZERO);
        assert_eq!(config.delete_retry.max_attempts, 3);
    }
}
