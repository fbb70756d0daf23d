//! Bundles: a parent quote whose money figures are rolled up from its children.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::cpq::policy::LifecyclePolicy;
use crate::domain::quote::{Quote, QuoteId, QuoteItem, QuoteStatus};
use crate::engine::{Caller, QuoteEngine};
use crate::errors::{ApplicationError, DomainError};
use crate::money::round_currency;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundleTotals {
    pub final_amount: Decimal,
    pub child_count: usize,
}

/// Lines and amounts a bundle's risk check runs over.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RiskScope {
    pub items: Vec<QuoteItem>,
    pub final_amount: Decimal,
    pub original_amount: Decimal,
}

/// Whether a child contributes to its bundle. Lapsed children drop out before
/// the sweep has stamped them.
pub fn is_counted(child: &Quote, now: DateTime<Utc>, lifecycle: &LifecyclePolicy) -> bool {
    if !child.is_active && !lifecycle.bundle_includes_inactive_children {
        return false;
    }
    !matches!(child.effective_status(now), QuoteStatus::Rejected | QuoteStatus::Expired)
}

pub fn derive_totals(
    children: &[Quote],
    now: DateTime<Utc>,
    lifecycle: &LifecyclePolicy,
) -> BundleTotals {
    let counted: Vec<&Quote> =
        children.iter().filter(|child| is_counted(child, now, lifecycle)).collect();
    BundleTotals {
        final_amount: round_currency(counted.iter().map(|child| child.final_amount).sum()),
        child_count: counted.len(),
    }
}

/// Writes derived totals onto the bundle. Returns `false` when nothing moved.
pub fn apply_totals(bundle: &mut Quote, totals: &BundleTotals) -> bool {
    let zero = round_currency(Decimal::ZERO);
    if bundle.total_amount == totals.final_amount
        && bundle.final_amount == totals.final_amount
        && bundle.discount_amount == zero
        && bundle.discount_rate == Decimal::ONE
    {
        return false;
    }
    bundle.total_amount = totals.final_amount;
    bundle.final_amount = totals.final_amount;
    bundle.discount_amount = zero;
    bundle.discount_rate = Decimal::ONE;
    true
}

pub fn risk_scope(
    children: &[Quote],
    now: DateTime<Utc>,
    lifecycle: &LifecyclePolicy,
) -> RiskScope {
    children.iter().filter(|child| is_counted(child, now, lifecycle)).fold(
        RiskScope::default(),
        |mut scope, child| {
            scope.items.extend(child.items.iter().cloned());
            scope.final_amount += child.final_amount;
            scope.original_amount += child.total_amount;
            scope
        },
    )
}

impl QuoteEngine {
    /// Re-derives a bundle's totals from a fresh read of its children.
    ///
    /// A write that loses the version race is retried from a new read, so a
    /// rollup never lands on top of a newer one with stale numbers.
    pub async fn recompute_bundle_total(
        &self,
        caller: &Caller,
        bundle_id: &QuoteId,
    ) -> Result<Quote, ApplicationError> {
        let lifecycle = self.policies.resolve_lifecycle(&caller.tenant_id);
        let attempts = self.settings.bundle_recompute_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let now = self.clock.now();
            let mut bundle = self.load(caller, bundle_id).await?;
            if !bundle.is_bundle() {
                return Err(DomainError::Validation(format!(
                    "quote `{bundle_id}` is not a bundle"
                ))
                .into());
            }
            if bundle.status == QuoteStatus::Converted {
                return Ok(bundle);
            }

            let children = self.quotes.list_bundle_children(&caller.tenant_id, bundle_id).await?;
            let totals = derive_totals(&children, now, &lifecycle);
            if !apply_totals(&mut bundle, &totals) {
                debug!(
                    event_name = "bundle.recompute_unchanged",
                    tenant_id = %caller.tenant_id,
                    quote_id = %bundle_id,
                    "bundle totals already current"
                );
                return Ok(bundle);
            }

            let expected_version = bundle.version;
            match self.commit(&mut bundle, expected_version, now).await {
                Ok(()) => {
                    info!(
                        event_name = "bundle.recomputed",
                        tenant_id = %caller.tenant_id,
                        quote_id = %bundle_id,
                        version = bundle.version,
                        final_amount = %bundle.final_amount,
                        children = totals.child_count,
                        "bundle totals recomputed"
                    );
                    return Ok(bundle);
                }
                Err(error) if error.is_conflict() && attempt < attempts => {
                    debug!(
                        event_name = "bundle.recompute_retry",
                        tenant_id = %caller.tenant_id,
                        quote_id = %bundle_id,
                        attempt,
                        "bundle changed during rollup; re-reading"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{apply_totals, derive_totals, is_counted, risk_scope};
    use crate::cpq::policy::LifecyclePolicy;
    use crate::domain::customer::TenantId;
    use crate::domain::quote::{Quote, QuoteItemInput, QuoteKind, QuoteStatus};

    fn child(price: i64, status: QuoteStatus) -> Quote {
        let mut quote = Quote::new_draft(TenantId("t-1".to_owned()), "sales-1", Utc::now());
        quote.items = vec![QuoteItemInput {
            product_id: None,
            product_name: "roller blind".to_owned(),
            category: Some("CURTAIN".to_owned()),
            quantity: Decimal::ONE,
            unit_cost: Decimal::from(price / 2),
            unit_price: Decimal::from(price),
        }
        .into_item()
        .expect("valid item")];
        quote.reprice();
        quote.status = status;
        quote
    }

    #[test]
    fn rejected_expired_and_superseded_children_are_not_counted() {
        let now = Utc::now();
        let policy = LifecyclePolicy::default();
        let mut lapsed = child(50, QuoteStatus::Approved);
        lapsed.valid_until = Some(now - Duration::hours(1));
        let mut superseded = child(70, QuoteStatus::Draft);
        superseded.is_active = false;

        let children = vec![
            child(100, QuoteStatus::Draft),
            child(200, QuoteStatus::Converted),
            child(400, QuoteStatus::Rejected),
            lapsed,
            superseded.clone(),
        ];
        let totals = derive_totals(&children, now, &policy);
        assert_eq!(totals.final_amount, Decimal::new(30_000, 2));
        assert_eq!(totals.child_count, 2);

        let inclusive = LifecyclePolicy { bundle_includes_inactive_children: true, ..policy };
        assert!(is_counted(&superseded, now, &inclusive));
    }

    #[test]
    fn applying_the_same_totals_twice_reports_no_change() {
        let now = Utc::now();
        let mut bundle = Quote::new_draft(TenantId("t-1".to_owned()), "sales-1", now);
        bundle.kind = QuoteKind::Bundle;
        let totals = derive_totals(&[child(120, QuoteStatus::Draft)], now, &Default::default());

        assert!(apply_totals(&mut bundle, &totals));
        assert_eq!(bundle.total_amount, bundle.final_amount);
        assert_eq!(bundle.final_amount.to_string(), "120.00");
        assert!(!apply_totals(&mut bundle, &totals));
    }

    #[test]
    fn risk_scope_unions_counted_children() {
        let now = Utc::now();
        let children = vec![child(100, QuoteStatus::Draft), child(300, QuoteStatus::Rejected)];
        let scope = risk_scope(&children, now, &LifecyclePolicy::default());
        assert_eq!(scope.items.len(), 1);
        assert_eq!(scope.final_amount, Decimal::new(10_000, 2));
        assert_eq!(scope.original_amount, Decimal::new(10_000, 2));
    }
}
