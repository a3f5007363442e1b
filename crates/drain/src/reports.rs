//! Read-only reports over the vendor and the state store.

use std::collections::BTreeMap;

use instantly_client::{CursorPaginator, PageSource, PaginationOptions};
use lead_store::{lead_state, Database};
use serde::Serialize;
use tracing::{info, warn};

use crate::api::LeadApi;
use crate::config::{DrainConfig, TrackedCampaign};
use crate::error::DrainError;

/// Mask an email for logs: `info@madelines.co` becomes `i***@madelines.co`.
pub fn mask_email(email: &str) -> String {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// Email as it should appear in logs under the current flags.
pub fn log_email(config: &DrainConfig, email: &str) -> String {
    if config.flags.mask_emails_in_logs {
        mask_email(email)
    } else {
        email.to_string()
    }
}

/// Paginator options derived from the drain configuration.
pub fn pagination_options(config: &DrainConfig) -> PaginationOptions {
    PaginationOptions {
        page_delay: config.pagination_delay,
        ..Default::default()
    }
}

/// Vendor and state store counts for one tracked campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignInventory {
    pub campaign_id: String,
    pub name: String,
    /// Leads the vendor lists in the campaign.
    pub vendor_leads: usize,
    /// Vendor leads with status 1.
    pub vendor_active: usize,
    /// `active`/`pending` rows in the state store.
    pub tracked_drainable: i64,
    /// The vendor walk stopped early; counts are a lower bound.
    pub truncated: bool,
}

impl CampaignInventory {
    /// Vendor leads minus tracked rows. Positive means the store is behind.
    pub fn difference(&self) -> i64 {
        self.vendor_leads as i64 - self.tracked_drainable
    }
}

/// Count vendor leads per tracked campaign and compare with the state store.
pub async fn inventory<S: PageSource>(
    paginator: &CursorPaginator<S>,
    db: &Database,
    config: &DrainConfig,
) -> Result<Vec<CampaignInventory>, DrainError> {
    let options = pagination_options(config);
    let mut report = Vec::with_capacity(config.campaigns.len());

    for campaign in &config.campaigns {
        let (leads, stats) = paginator.fetch_all_leads(Some(&campaign.id), &options).await;
        let tracked_drainable = lead_state::count_drainable_in_campaign(db.pool(), &campaign.id).await?;

        let entry = CampaignInventory {
            campaign_id: campaign.id.clone(),
            name: campaign.name.clone(),
            vendor_leads: leads.len(),
            vendor_active: leads.iter().filter(|lead| lead.status == 1).count(),
            tracked_drainable,
            truncated: stats.truncated,
        };

        if entry.truncated {
            warn!("{} inventory is incomplete: vendor walk was truncated", entry.name);
        }
        info!(
            "{}: {} vendor leads ({} active), {} tracked, difference {}",
            entry.name,
            entry.vendor_leads,
            entry.vendor_active,
            entry.tracked_drainable,
            entry.difference()
        );

        report.push(entry);
    }

    Ok(report)
}

/// Tracked campaigns the API key cannot see at the vendor.
pub async fn missing_campaigns<A: LeadApi + ?Sized>(
    api: &A,
    config: &DrainConfig,
) -> Result<Vec<TrackedCampaign>, DrainError> {
    let visible = api.list_campaigns().await?;

    let mut missing = Vec::new();
    for tracked in &config.campaigns {
        match visible.iter().find(|c| c.id == tracked.id) {
            Some(campaign) => info!("{} is \"{}\" at the vendor", tracked.name, campaign.name),
            None => {
                warn!("{} ({}) is not visible at the vendor", tracked.name, tracked.id);
                missing.push(tracked.clone());
            }
        }
    }
    Ok(missing)
}

/// A vendor lead outside every tracked campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedLead {
    pub id: String,
    pub email: String,
    pub campaign: Option<String>,
    pub status: i64,
}

/// Result of an orphan scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanReport {
    pub total_leads: usize,
    pub orphans: Vec<OrphanedLead>,
    /// Orphan counts keyed by campaign id, `"(none)"` for unassigned leads.
    pub by_campaign: BTreeMap<String, usize>,
    pub truncated: bool,
}

impl OrphanReport {
    pub fn unassigned(&self) -> usize {
        self.by_campaign.get(UNASSIGNED).copied().unwrap_or(0)
    }
}

const UNASSIGNED: &str = "(none)";

/// Find vendor leads with no campaign or an untracked one.
pub async fn find_orphans<S: PageSource>(
    paginator: &CursorPaginator<S>,
    config: &DrainConfig,
) -> OrphanReport {
    let (leads, stats) = paginator
        .fetch_all_leads(None, &pagination_options(config))
        .await;

    let mut report = OrphanReport {
        total_leads: leads.len(),
        truncated: stats.truncated,
        ..Default::default()
    };

    for lead in leads {
        let tracked = lead
            .campaign
            .as_deref()
            .is_some_and(|id| config.campaign(id).is_some());
        if tracked {
            continue;
        }

        let key = lead
            .campaign
            .clone()
            .unwrap_or_else(|| UNASSIGNED.to_string());
        *report.by_campaign.entry(key).or_insert(0) += 1;

        report.orphans.push(OrphanedLead {
            id: lead.id,
            email: lead.email,
            campaign: lead.campaign,
            status: lead.status,
        });
    }

    info!(
        "Orphan scan: {} of {} vendor leads outside tracked campaigns ({} unassigned)",
        report.orphans.len(),
        report.total_leads,
        report.unassigned()
    );

    report
}
