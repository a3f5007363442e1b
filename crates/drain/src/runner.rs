//! The drain runner: select candidates, classify, apply.

use std::time::Duration;

use chrono::{DateTime, Utc};
use instantly_client::{InstantlyError, VendorLead};
use lead_store::dead_letter::{self, NewDeadLetter};
use lead_store::{
    lead_state, CandidateQuery, Database, DatabaseError, DrainCandidate, DrainedLead, Suppression,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::LeadApi;
use crate::classify::{classify_with, Disposition, DrainDecision, KeepReason};
use crate::config::DrainConfig;
use crate::error::DrainError;
use crate::reports::log_email;

/// Dead letter phase for failed vendor lookups.
pub const PHASE_LOOKUP: &str = "drain_lookup";
/// Dead letter phase for failed vendor deletes.
pub const PHASE_DELETE: &str = "drain_delete";
/// Dead letter phase for state writes that failed after a delete.
pub const PHASE_STATE_UPDATE: &str = "state_update_drain";

/// Do-not-contact entry written for unsubscribed leads.
const UNSUBSCRIBE_SUPPRESSION: Suppression<'static> = Suppression {
    source: "instantly_drain",
    reason: "unsubscribe_via_api",
    added_by: "lead_drain",
};

/// Per-classification counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationCounts {
    pub completed: usize,
    pub replied: usize,
    pub bounced_hard: usize,
    pub unsubscribed: usize,
    pub stale_active: usize,
    pub missing: usize,
    pub auto_reply_detected: usize,
    pub kept_active: usize,
    pub kept_paused: usize,
    pub kept_other: usize,
    pub api_errors: usize,
}

impl ClassificationCounts {
    fn record_drain(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Completed => self.completed += 1,
            Disposition::Replied => self.replied += 1,
            Disposition::BouncedHard => self.bounced_hard += 1,
            Disposition::Unsubscribed => self.unsubscribed += 1,
            Disposition::StaleActive => self.stale_active += 1,
        }
    }

    fn record_keep(&mut self, reason: &KeepReason, vendor_status: i64) {
        if reason.is_auto_reply() {
            self.auto_reply_detected += 1;
        } else if matches!(reason, KeepReason::ClassificationError { .. }) {
            self.kept_other += 1;
        } else if vendor_status == 1 {
            self.kept_active += 1;
        } else if vendor_status == 2 {
            self.kept_paused += 1;
        } else {
            self.kept_other += 1;
        }
    }

    /// Non-zero counters, largest first.
    pub fn nonzero(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = [
            ("completed", self.completed),
            ("replied", self.replied),
            ("bounced_hard", self.bounced_hard),
            ("unsubscribed", self.unsubscribed),
            ("stale_active", self.stale_active),
            ("missing", self.missing),
            ("auto_reply_detected", self.auto_reply_detected),
            ("kept_active", self.kept_active),
            ("kept_paused", self.kept_paused),
            ("kept_other", self.kept_other),
            ("api_errors", self.api_errors),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadAction {
    /// Evaluated and left in its campaign.
    Kept,
    /// Would be drained; dry run.
    WouldDrain,
    /// Deleted at the vendor and recorded.
    Drained,
    /// Delete failed; will be retried.
    DeleteFailed,
    /// The vendor no longer has the lead.
    Missing,
    /// Lookup failed; will be retried.
    LookupFailed,
}

/// Per-candidate result.
#[derive(Debug, Clone, Serialize)]
pub struct LeadOutcome {
    pub email: String,
    pub campaign_id: String,
    pub lead_id: Option<String>,
    pub action: LeadAction,
    pub decision: Option<DrainDecision>,
}

/// Summary of a drain run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub dry_run: bool,
    pub candidates: usize,
    pub evaluated: usize,
    pub api_calls: usize,
    pub leads_found: usize,
    pub leads_missing: usize,
    pub api_errors: usize,
    pub classifications: ClassificationCounts,
    pub to_drain: usize,
    pub deleted: usize,
    pub delete_failures: usize,
    pub state_errors: usize,
    pub outcomes: Vec<LeadOutcome>,
}

impl DrainReport {
    /// Percentage of lookups that found the lead.
    pub fn api_success_rate(&self) -> f64 {
        if self.api_calls == 0 {
            return 0.0;
        }
        self.leads_found as f64 / self.api_calls as f64 * 100.0
    }

    /// Percentage of attempted deletes that succeeded.
    pub fn delete_success_rate(&self) -> f64 {
        let attempted = self.deleted + self.delete_failures;
        if attempted == 0 {
            return 0.0;
        }
        self.deleted as f64 / attempted as f64 * 100.0
    }

    /// Log the run summary.
    pub fn log_summary(&self) {
        info!("{}", "=".repeat(60));
        info!(
            "Drain run complete{}",
            if self.dry_run { " (DRY RUN)" } else { "" }
        );
        info!("  Candidates: {}, evaluated: {}", self.candidates, self.evaluated);
        info!(
            "  API calls: {}, found: {}, missing: {}, errors: {} ({:.1}% success)",
            self.api_calls,
            self.leads_found,
            self.leads_missing,
            self.api_errors,
            self.api_success_rate()
        );
        info!(
            "  To drain: {}, deleted: {}, delete failures: {}",
            self.to_drain, self.deleted, self.delete_failures
        );
        if self.state_errors > 0 {
            warn!("  State store errors: {}", self.state_errors);
        }

        let counts = self.classifications.nonzero();
        if !counts.is_empty() {
            let total: usize = counts.iter().map(|(_, count)| count).sum();
            info!("  Classifications:");
            for (name, count) in counts {
                info!(
                    "    {}: {} ({:.1}%)",
                    name,
                    count,
                    count as f64 / total as f64 * 100.0
                );
            }
        }
        info!("{}", "=".repeat(60));
    }

    fn push(
        &mut self,
        candidate: &DrainCandidate,
        lead_id: Option<&str>,
        action: LeadAction,
        decision: Option<DrainDecision>,
    ) {
        self.outcomes.push(LeadOutcome {
            email: candidate.email.clone(),
            campaign_id: candidate.campaign_id.clone(),
            lead_id: lead_id.map(str::to_string),
            action,
            decision,
        });
    }
}

/// A vendor lead and how it would be classified right now.
#[derive(Debug, Clone, Serialize)]
pub struct InspectedLead {
    pub lead: VendorLead,
    pub tracked_campaign: Option<String>,
    pub decision: DrainDecision,
}

/// Look up every vendor lead with `email` and classify it as of `now`.
///
/// Needs no state store and never writes.
pub async fn inspect<A: LeadApi + ?Sized>(
    api: &A,
    config: &DrainConfig,
    email: &str,
    now: DateTime<Utc>,
) -> Result<Vec<InspectedLead>, DrainError> {
    let leads = api.search_leads(email).await?;

    Ok(leads
        .into_iter()
        .map(|lead| {
            let tracked_campaign = lead
                .campaign
                .as_deref()
                .and_then(|id| config.campaign(id))
                .map(|campaign| campaign.name.clone());
            let decision = classify_with(&lead, now, &config.thresholds);
            InspectedLead {
                lead,
                tracked_campaign,
                decision,
            }
        })
        .collect())
}

/// Runs drain batches against a vendor and the state store.
pub struct DrainRunner<A: LeadApi> {
    api: A,
    db: Database,
    config: DrainConfig,
}

impl<A: LeadApi> DrainRunner<A> {
    pub fn new(api: A, db: Database, config: DrainConfig) -> Self {
        Self { api, db, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// The candidate query for a run at `now`.
    pub fn candidate_query(&self, now: DateTime<Utc>) -> CandidateQuery {
        CandidateQuery {
            campaign_ids: self.config.campaign_ids(),
            recheck_after: self.config.recheck_after,
            batch_size: self.config.batch_size,
            now,
            force: self.config.force_drain_check(),
        }
    }

    /// Leads due for evaluation at `now`.
    pub async fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<DrainCandidate>, DrainError> {
        let query = self.candidate_query(now);
        Ok(lead_state::select_drain_candidates(self.db.pool(), &query).await?)
    }

    /// Run one drain batch now.
    pub async fn run(&self) -> Result<DrainReport, DrainError> {
        self.run_at(Utc::now()).await
    }

    /// Run one drain batch as of `now`.
    ///
    /// Only candidate selection can fail the run. Lookup, delete and state
    /// errors are counted, recorded as dead letters and skipped.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<DrainReport, DrainError> {
        let candidates = self.candidates(now).await?;

        let mut report = DrainReport {
            dry_run: self.config.dry_run,
            candidates: candidates.len(),
            ..Default::default()
        };

        info!(
            "Drain batch: {} candidates via {} (dry run: {}, force: {})",
            candidates.len(),
            self.api.name(),
            self.config.dry_run,
            self.config.force_drain_check()
        );

        for candidate in &candidates {
            let limit = self.config.max_leads_to_evaluate as usize;
            if limit > 0 && report.evaluated >= limit {
                info!("Evaluation limit reached: {} leads", limit);
                break;
            }
            report.evaluated += 1;

            self.evaluate(candidate, now, &mut report).await;
        }

        Ok(report)
    }

    /// Look up every vendor lead with `email` and classify it. Never writes.
    pub async fn inspect(&self, email: &str) -> Result<Vec<InspectedLead>, DrainError> {
        inspect(&self.api, &self.config, email, Utc::now()).await
    }

    async fn evaluate(&self, candidate: &DrainCandidate, now: DateTime<Utc>, report: &mut DrainReport) {
        let shown = log_email(&self.config, &candidate.email);

        pause(self.config.lookup_delay).await;
        report.api_calls += 1;

        let lookup = match candidate.instantly_lead_id.as_deref() {
            Some(lead_id) => self.api.get_lead(lead_id).await,
            None => self.find_by_email(candidate).await,
        };

        let lead = match lookup {
            Ok(Some(lead)) => {
                report.leads_found += 1;
                if candidate.instantly_lead_id.is_none() && !self.config.dry_run {
                    if let Err(e) = lead_state::set_vendor_id(self.db.pool(), &candidate.email, &lead.id).await {
                        warn!("Failed to store vendor id for {}: {}", shown, e);
                        report.state_errors += 1;
                    }
                }
                lead
            }
            Ok(None) => {
                report.leads_missing += 1;
                report.classifications.missing += 1;
                info!("MISSING: {} is no longer known to the vendor", shown);
                if !self.config.dry_run {
                    if let Err(e) = lead_state::mark_missing(self.db.pool(), &candidate.email, now).await {
                        self.state_error(candidate, "mark missing", e, report).await;
                    }
                }
                let lead_id = candidate.instantly_lead_id.as_deref();
                report.push(candidate, lead_id, LeadAction::Missing, None);
                return;
            }
            Err(e) => {
                report.api_errors += 1;
                report.classifications.api_errors += 1;
                warn!("Lookup failed for {}: {}; will retry next run", shown, e);
                if !self.config.dry_run {
                    self.dead_letter(PHASE_LOOKUP, candidate, &e, 1, now).await;
                }
                let lead_id = candidate.instantly_lead_id.as_deref();
                report.push(candidate, lead_id, LeadAction::LookupFailed, None);
                return;
            }
        };

        let decision = classify_with(&lead, now, &self.config.thresholds);

        match &decision {
            DrainDecision::Keep(reason) => {
                report.classifications.record_keep(reason, lead.status);
                debug!("KEEP: {} ({})", shown, reason);
                if !self.config.dry_run {
                    if let Err(e) = lead_state::stamp_drain_check(self.db.pool(), &candidate.email, now).await {
                        warn!("Failed to stamp drain check for {}: {}", shown, e);
                        report.state_errors += 1;
                    }
                }
                report.push(candidate, Some(&lead.id), LeadAction::Kept, Some(decision.clone()));
            }
            DrainDecision::Drain {
                disposition,
                details,
            } => {
                report.classifications.record_drain(*disposition);
                report.to_drain += 1;
                info!("DRAIN: {} -> {} | {}", shown, disposition, details);

                let action = if self.config.dry_run {
                    LeadAction::WouldDrain
                } else {
                    self.apply_drain(candidate, &lead.id, *disposition, now, report).await
                };
                report.push(candidate, Some(&lead.id), action, Some(decision.clone()));
            }
        }
    }

    /// Resolve a lead with no stored vendor id by searching its email.
    ///
    /// Only a lead in the candidate's own campaign counts. The same email in
    /// another campaign is a different enrollment and is never touched.
    async fn find_by_email(&self, candidate: &DrainCandidate) -> Result<Option<VendorLead>, InstantlyError> {
        let matches = self.api.search_leads(&candidate.email).await?;
        let total = matches.len();

        let found = matches
            .into_iter()
            .find(|lead| lead.campaign.as_deref() == Some(candidate.campaign_id.as_str()));

        if found.is_none() && total > 0 {
            info!(
                "{} has {} vendor lead(s), none in campaign {}",
                log_email(&self.config, &candidate.email),
                total,
                candidate.campaign_id
            );
        }
        Ok(found)
    }

    /// Delete at the vendor, then record the terminal state.
    async fn apply_drain(
        &self,
        candidate: &DrainCandidate,
        lead_id: &str,
        disposition: Disposition,
        now: DateTime<Utc>,
        report: &mut DrainReport,
    ) -> LeadAction {
        let shown = log_email(&self.config, &candidate.email);
        pause(self.config.delete_delay).await;

        if let Err(e) = self.api.delete_lead(lead_id, &self.config.delete_retry).await {
            report.delete_failures += 1;
            error!("Delete failed for {} ({}): {}", shown, lead_id, e);

            let attempts = if e.is_transient() {
                self.config.delete_retry.max_attempts
            } else {
                1
            };
            self.dead_letter(PHASE_DELETE, candidate, &e, attempts, now).await;

            if let Err(e) = lead_state::record_deletion_failure(self.db.pool(), &candidate.email, now).await {
                warn!("Failed to record deletion failure for {}: {}", shown, e);
                report.state_errors += 1;
            }
            return LeadAction::DeleteFailed;
        }
        report.deleted += 1;

        if let Err(e) = self.record_drain(candidate, disposition, now).await {
            self.state_error(candidate, disposition.as_str(), e, report).await;
        }

        LeadAction::Drained
    }

    async fn record_drain(
        &self,
        candidate: &DrainCandidate,
        disposition: Disposition,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let drained = DrainedLead {
            email: &candidate.email,
            campaign_id: &candidate.campaign_id,
            status: disposition.lead_status(),
            history_sequence: disposition
                .records_history()
                .then(|| self.config.sequence_name(&candidate.campaign_id)),
            suppression: disposition.suppresses().then_some(UNSUBSCRIBE_SUPPRESSION),
            drained_at: now,
        };

        lead_state::record_drained(self.db.pool(), &drained).await
    }

    async fn state_error(
        &self,
        candidate: &DrainCandidate,
        what: &str,
        e: DatabaseError,
        report: &mut DrainReport,
    ) {
        report.state_errors += 1;
        let shown = log_email(&self.config, &candidate.email);
        error!("State update ({}) failed for {}: {}", what, shown, e);

        let letter = NewDeadLetter {
            phase: PHASE_STATE_UPDATE,
            email: Some(&candidate.email),
            error: &e.to_string(),
            payload: Some(what),
            ..Default::default()
        };
        if let Err(e) = dead_letter::log_dead_letter(self.db.pool(), &letter, Utc::now()).await {
            error!("Failed to record dead letter: {}", e);
        }
    }

    async fn dead_letter(
        &self,
        phase: &str,
        candidate: &DrainCandidate,
        e: &InstantlyError,
        retry_count: u32,
        now: DateTime<Utc>,
    ) {
        let payload = format!(
            "lead_id={} campaign_id={}",
            candidate.instantly_lead_id.as_deref().unwrap_or("-"),
            candidate.campaign_id
        );
        let letter = NewDeadLetter {
            phase,
            email: Some(&candidate.email),
            http_status: e.status_code(),
            error: &e.to_string(),
            payload: Some(&payload),
            retry_count,
        };
        if let Err(e) = dead_letter::log_dead_letter(self.db.pool(), &letter, now).await {
            error!("Failed to record dead letter: {}", e);
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
