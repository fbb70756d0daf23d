use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteEvent {
    Edit,
    Submit,
    Approve,
    Reject,
    Revise,
    Convert,
    Expire,
    Refresh,
    Lock,
    Unlock,
}

impl QuoteEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Revise => "revise",
            Self::Convert => "convert",
            Self::Expire => "expire",
            Self::Refresh => "refresh",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

impl fmt::Display for QuoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects the engine owes once a transition is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    EvaluateRisk,
    RecomputeBundle,
    NotifyOrderHandoff,
    RecordAudit,
}

/// Facts the table needs beyond the current status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub locked: bool,
    pub allow_review_edits: bool,
    /// Submit may skip review: the tenant opted in, the rate is at or above the
    /// threshold and the risk check came back clean.
    pub auto_approve: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub event: QuoteEvent,
    pub actions: Vec<LifecycleAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: LifecycleAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}
