//! Optimistic concurrency: every quote carries a version, every write names
//! the version it was based on.

use chrono::{DateTime, Utc};

use crate::domain::quote::Quote;
use crate::errors::ApplicationError;
use crate::store::WriteOutcome;

pub struct VersionGuard;

impl VersionGuard {
    /// Fails fast when the caller's copy is already known to be stale.
    pub fn check(quote: &Quote, expected_version: u32) -> Result<(), ApplicationError> {
        if quote.version != expected_version {
            return Err(Self::conflict(quote, expected_version));
        }
        Ok(())
    }

    pub fn next_version(quote: &Quote, expected_version: u32) -> Result<u32, ApplicationError> {
        expected_version.checked_add(1).ok_or_else(|| Self::conflict(quote, expected_version))
    }

    /// Bumps the version and touch time on a copy about to be written.
    pub fn stage(
        quote: &mut Quote,
        expected_version: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        quote.version = Self::next_version(quote, expected_version)?;
        quote.updated_at = now;
        Ok(())
    }

    pub fn settle(
        quote: &Quote,
        expected_version: u32,
        outcome: WriteOutcome,
    ) -> Result<(), ApplicationError> {
        match outcome {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::Conflict => Err(Self::conflict(quote, expected_version)),
        }
    }

    pub fn conflict(quote: &Quote, expected_version: u32) -> ApplicationError {
        ApplicationError::ConcurrencyConflict {
            entity: "quote",
            id: quote.id.0.clone(),
            expected_version,
        }
    }
}
