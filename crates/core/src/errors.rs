use rust_decimal::Decimal;
use thiserror::Error;

use crate::{domain::quote::QuoteStatus, lifecycle::QuoteEvent};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("cannot {event} a quote in {from} status")]
    InvalidStateTransition { from: QuoteStatus, event: QuoteEvent },
    #[error("negative margin blocked: final {final_amount} is below cost {total_cost} (gap {gap})")]
    NegativeMarginBlocked { total_cost: Decimal, final_amount: Decimal, gap: Decimal },
    #[error("approver `{approver}` submitted this quote and cannot approve it")]
    SegregationOfDutiesViolation { approver: String },
    #[error("quote is locked for editing")]
    QuoteLocked,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} `{id}` was modified concurrently (expected version {expected_version})")]
    ConcurrencyConflict { entity: &'static str, id: String, expected_version: u32 },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "This quote was changed by someone else. Reload it and apply your changes again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error @ DomainError::InvariantViolation(_)) => {
                Self::Internal { message: error.to_string(), correlation_id }
            }
            // Hard-stop and segregation failures carry their reason through to the caller.
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::ConcurrencyConflict { .. } => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::quote::QuoteStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::lifecycle::QuoteEvent;

    #[test]
    fn hard_stop_maps_to_bad_request_with_figures() {
        let interface = ApplicationError::from(DomainError::NegativeMarginBlocked {
            total_cost: Decimal::new(20_000, 2),
            final_amount: Decimal::new(19_000, 2),
            gap: Decimal::new(1_000, 2),
        })
        .into_interface("req-1");

        match interface {
            InterfaceError::BadRequest { ref message, ref correlation_id } => {
                assert_eq!(correlation_id, "req-1");
                assert!(message.contains("200.00"));
                assert!(message.contains("190.00"));
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn broken_invariants_surface_as_internal_errors() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "revision counter overflowed".to_owned(),
        ))
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn invalid_transition_names_both_sides() {
        let error = DomainError::InvalidStateTransition {
            from: QuoteStatus::Converted,
            event: QuoteEvent::Edit,
        };
        assert_eq!(error.to_string(), "cannot edit a quote in CONVERTED status");
    }

    #[test]
    fn concurrency_conflict_asks_for_reload() {
        let interface = ApplicationError::ConcurrencyConflict {
            entity: "quote",
            id: "q-1".to_owned(),
            expected_version: 1,
        }
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(interface.user_message().contains("Reload"));
    }

    #[test]
    fn not_found_and_persistence_have_distinct_classes() {
        let not_found = ApplicationError::NotFound { entity: "quote", id: "q-9".to_owned() };
        let not_found = not_found.into_interface("r");
        assert!(matches!(not_found, InterfaceError::NotFound { .. }));

        let persistence =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("r");
        assert!(matches!(persistence, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            persistence.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
