//! Deadline handling. Reads apply expiration lazily; `batch_expire` stamps it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::customer::TenantId;
use crate::domain::quote::{Quote, QuoteId, QuoteStatus};
use crate::engine::{Caller, QuoteEngine};
use crate::errors::ApplicationError;
use crate::lifecycle::{transition, QuoteEvent, TransitionContext};

pub fn is_logically_expired(quote: &Quote, now: DateTime<Utc>) -> bool {
    quote.is_logically_expired(now)
}

pub fn expire_candidates(quotes: &[Quote], now: DateTime<Utc>) -> Vec<&Quote> {
    quotes.iter().filter(|quote| is_logically_expired(quote, now)).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExpirySweepReport {
    pub tenant_id: TenantId,
    pub scanned: usize,
    pub expired: Vec<QuoteId>,
    /// Quotes another writer touched mid-sweep; the next run picks them up.
    pub conflicts: Vec<QuoteId>,
    /// Quotes whose write failed; they stay lapsed and are retried next run.
    pub failed: Vec<QuoteId>,
    pub bundles_recomputed: Vec<QuoteId>,
    pub ran_at: DateTime<Utc>,
}

impl ExpirySweepReport {
    fn new(tenant_id: TenantId, scanned: usize, ran_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            scanned,
            expired: Vec::new(),
            conflicts: Vec::new(),
            failed: Vec::new(),
            bundles_recomputed: Vec::new(),
            ran_at,
        }
    }
}

impl QuoteEngine {
    /// Stamps `Expired` on every lapsed, non-terminal quote of the caller's tenant.
    ///
    /// Each quote is written through the version guard, so an edit that races
    /// the sweep wins and the quote is reported as a conflict instead. A failed
    /// write is reported and skipped; bundles of the quotes that did lapse are
    /// still rolled up.
    pub async fn batch_expire(
        &self,
        caller: &Caller,
    ) -> Result<ExpirySweepReport, ApplicationError> {
        let now = self.clock.now();
        let lapsed = self.quotes.list_expirable(&caller.tenant_id, now).await?;
        let mut report = ExpirySweepReport::new(caller.tenant_id.clone(), lapsed.len(), now);
        let mut touched_bundles = BTreeSet::new();

        for candidate in expire_candidates(&lapsed, now) {
            let context = TransitionContext { locked: candidate.is_locked(), ..Default::default() };
            let outcome = match transition(candidate.status, QuoteEvent::Expire, &context) {
                Ok(outcome) => outcome,
                Err(_) => continue,
            };

            let expected_version = candidate.version;
            let mut quote = candidate.clone();
            quote.status = QuoteStatus::Expired;
            match self.commit(&mut quote, expected_version, now).await {
                Ok(()) => {
                    self.record(
                        AuditEvent::new(
                            caller.tenant_id.clone(),
                            Some(quote.id.clone()),
                            "quote.expire",
                            AuditCategory::Expiry,
                            caller.user_id.as_str(),
                            AuditOutcome::Success,
                            now,
                        )
                        .with_metadata("from", outcome.from)
                        .with_metadata("version", quote.version),
                    );
                    if let Some(bundle_id) = quote.bundle_id.as_ref() {
                        touched_bundles.insert(bundle_id.0.clone());
                    }
                    report.expired.push(quote.id);
                }
                Err(error) if error.is_conflict() => report.conflicts.push(quote.id),
                Err(error) => {
                    warn!(
                        event_name = "expiry.quote_failed",
                        tenant_id = %caller.tenant_id,
                        quote_id = %quote.id,
                        error = %error,
                        "could not stamp lapsed quote"
                    );
                    report.failed.push(quote.id);
                }
            }
        }

        for bundle_id in touched_bundles.into_iter().map(QuoteId) {
            match self.recompute_bundle_total(caller, &bundle_id).await {
                Ok(_) => report.bundles_recomputed.push(bundle_id),
                Err(error) => warn!(
                    event_name = "expiry.bundle_recompute_failed",
                    tenant_id = %caller.tenant_id,
                    bundle_id = %bundle_id,
                    error = %error,
                    "bundle rollup after expiry did not complete"
                ),
            }
        }

        info!(
            event_name = "expiry.sweep_completed",
            tenant_id = %caller.tenant_id,
            scanned = report.scanned,
            expired = report.expired.len(),
            conflicts = report.conflicts.len(),
            failed = report.failed.len(),
            bundles_recomputed = report.bundles_recomputed.len(),
            "expiry sweep completed"
        );
        Ok(report)
    }
}
