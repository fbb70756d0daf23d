//! Persistence ports. Every lookup is scoped by tenant; a record owned by
//! another tenant is indistinguishable from a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::customer::TenantId;
use crate::domain::quote::{Quote, QuoteId};
use crate::domain::template::{QuoteTemplate, TemplateId};
use crate::errors::ApplicationError;

pub mod memory;

pub use memory::{InMemoryQuoteStore, InMemoryTemplateStore};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
    #[error("record `{0}` already exists")]
    Duplicate(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

/// Result of a version-conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored version no longer matched; nothing was written.
    Conflict,
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn find_quote(&self, tenant: &TenantId, id: &QuoteId)
        -> Result<Option<Quote>, StoreError>;

    async fn insert_quote(&self, quote: &Quote) -> Result<(), StoreError>;

    /// Replaces the stored quote and its lines only while the stored version
    /// still equals `expected_version`.
    async fn update_quote(
        &self,
        quote: &Quote,
        expected_version: u32,
    ) -> Result<WriteOutcome, StoreError>;

    /// Writes `retired` under the same version condition as `update_quote` and
    /// inserts `successor`, as one unit: either both land or neither does.
    async fn replace_revision(
        &self,
        retired: &Quote,
        expected_version: u32,
        successor: &Quote,
    ) -> Result<WriteOutcome, StoreError>;

    async fn list_bundle_children(
        &self,
        tenant: &TenantId,
        bundle_id: &QuoteId,
    ) -> Result<Vec<Quote>, StoreError>;

    /// Quotes whose deadline has passed and whose stored status can still lapse.
    async fn list_expirable(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quote>, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<QuoteTemplate>, StoreError>;

    async fn insert_template(&self, template: &QuoteTemplate) -> Result<(), StoreError>;

    /// Active templates only, newest first.
    async fn list_templates(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<QuoteTemplate>, StoreError>;

    /// Soft delete. Returns `false` when no active template matched.
    async fn deactivate_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
