use crate::domain::quote::QuoteStatus;
use crate::errors::DomainError;
use crate::lifecycle::states::{LifecycleAction, QuoteEvent, TransitionContext, TransitionOutcome};

/// Applies `event` to a quote whose effective status is `current`.
///
/// Callers pass the effective status, so a lapsed quote is treated as
/// `Expired` here even before the sweep stamps it.
pub fn transition(
    current: QuoteStatus,
    event: QuoteEvent,
    context: &TransitionContext,
) -> Result<TransitionOutcome, DomainError> {
    use LifecycleAction::{EvaluateRisk, NotifyOrderHandoff, RecomputeBundle, RecordAudit};
    use QuoteEvent::{
        Approve, Convert, Edit, Expire, Lock, Refresh, Reject, Revise, Submit, Unlock,
    };
    use QuoteStatus::{Approved, Converted, Draft, Expired, PendingApproval, Rejected};

    let invalid = || DomainError::InvalidStateTransition { from: current, event };

    let (to, actions) = match (current, event) {
        (Draft, Edit) | (PendingApproval, Edit) => {
            if current == PendingApproval && !context.allow_review_edits {
                return Err(invalid());
            }
            if context.locked {
                return Err(DomainError::QuoteLocked);
            }
            (current, vec![EvaluateRisk, RecomputeBundle, RecordAudit])
        }
        (Draft, Submit) => {
            if context.auto_approve {
                (
                    Approved,
                    vec![EvaluateRisk, RecomputeBundle, NotifyOrderHandoff, RecordAudit],
                )
            } else {
                (PendingApproval, vec![EvaluateRisk, RecomputeBundle, RecordAudit])
            }
        }
        (PendingApproval, Approve) => {
            (Approved, vec![RecomputeBundle, NotifyOrderHandoff, RecordAudit])
        }
        (PendingApproval, Reject) => (Rejected, vec![RecomputeBundle, RecordAudit]),
        (Rejected, Revise) => (Draft, vec![RecomputeBundle, RecordAudit]),
        (Approved, Convert) => (Converted, vec![RecomputeBundle, NotifyOrderHandoff, RecordAudit]),
        (Draft, Expire) | (PendingApproval, Expire) | (Approved, Expire) => {
            (Expired, vec![RecomputeBundle, RecordAudit])
        }
        (Draft, Refresh) | (PendingApproval, Refresh) | (Expired, Refresh) => {
            if context.locked {
                return Err(DomainError::QuoteLocked);
            }
            (Draft, vec![EvaluateRisk, RecomputeBundle, RecordAudit])
        }
        (Draft, Lock) | (PendingApproval, Lock) | (Approved, Lock) => (current, vec![RecordAudit]),
        (Draft, Unlock) | (PendingApproval, Unlock) | (Approved, Unlock) => {
            (current, vec![RecordAudit])
        }
        (Approved | Rejected | Expired | Converted, Edit)
        | (PendingApproval | Approved | Rejected | Expired | Converted, Submit)
        | (Draft | Approved | Rejected | Expired | Converted, Approve | Reject)
        | (Draft | PendingApproval | Approved | Expired | Converted, Revise)
        | (Draft | PendingApproval | Rejected | Expired | Converted, Convert)
        | (Rejected | Expired | Converted, Expire)
        | (Approved | Rejected | Converted, Refresh)
        | (Rejected | Expired | Converted, Lock | Unlock) => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
