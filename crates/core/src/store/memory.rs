use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::customer::TenantId;
use crate::domain::quote::{Quote, QuoteId};
use crate::domain::template::{QuoteTemplate, TemplateId};
use crate::store::{QuoteStore, StoreError, TemplateStore, WriteOutcome};

/// Process-local quote store. The version check and the replace happen under
/// one write guard, so concurrent writers see compare-and-swap semantics.
#[derive(Default)]
pub struct InMemoryQuoteStore {
    quotes: RwLock<HashMap<String, Quote>>,
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn find_quote(
        &self,
        tenant: &TenantId,
        id: &QuoteId,
    ) -> Result<Option<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&id.0).filter(|quote| &quote.tenant_id == tenant).cloned())
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<(), StoreError> {
        let mut quotes = self.quotes.write().await;
        if quotes.contains_key(&quote.id.0) {
            return Err(StoreError::Duplicate(quote.id.0.clone()));
        }
        quotes.insert(quote.id.0.clone(), quote.clone());
        Ok(())
    }

    async fn update_quote(
        &self,
        quote: &Quote,
        expected_version: u32,
    ) -> Result<WriteOutcome, StoreError> {
        let mut quotes = self.quotes.write().await;
        match quotes.get_mut(&quote.id.0) {
            Some(stored)
                if stored.tenant_id == quote.tenant_id && stored.version == expected_version =>
            {
                *stored = quote.clone();
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }

    async fn replace_revision(
        &self,
        retired: &Quote,
        expected_version: u32,
        successor: &Quote,
    ) -> Result<WriteOutcome, StoreError> {
        let mut quotes = self.quotes.write().await;
        if quotes.contains_key(&successor.id.0) {
            return Err(StoreError::Duplicate(successor.id.0.clone()));
        }
        match quotes.get_mut(&retired.id.0) {
            Some(stored)
                if stored.tenant_id == retired.tenant_id && stored.version == expected_version =>
            {
                *stored = retired.clone();
            }
            _ => return Ok(WriteOutcome::Conflict),
        }
        quotes.insert(successor.id.0.clone(), successor.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn list_bundle_children(
        &self,
        tenant: &TenantId,
        bundle_id: &QuoteId,
    ) -> Result<Vec<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        let mut children: Vec<Quote> = quotes
            .values()
            .filter(|quote| {
                &quote.tenant_id == tenant && quote.bundle_id.as_ref() == Some(bundle_id)
            })
            .cloned()
            .collect();
        children.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(children)
    }

    async fn list_expirable(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quote>, StoreError> {
        let quotes = self.quotes.read().await;
        let mut lapsed: Vec<Quote> = quotes
            .values()
            .filter(|quote| &quote.tenant_id == tenant && quote.is_logically_expired(now))
            .cloned()
            .collect();
        lapsed.sort_by(|left, right| left.valid_until.cmp(&right.valid_until));
        Ok(lapsed)
    }
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, QuoteTemplate>>,
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn find_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<QuoteTemplate>, StoreError> {
        let templates = self.templates.read().await;
        Ok(templates
            .get(&id.0)
            .filter(|template| &template.tenant_id == tenant && template.is_active)
            .cloned())
    }

    async fn insert_template(&self, template: &QuoteTemplate) -> Result<(), StoreError> {
        let mut templates = self.templates.write().await;
        if templates.contains_key(&template.id.0) {
            return Err(StoreError::Duplicate(template.id.0.clone()));
        }
        templates.insert(template.id.0.clone(), template.clone());
        Ok(())
    }

    async fn list_templates(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<QuoteTemplate>, StoreError> {
        let templates = self.templates.read().await;
        let mut listed: Vec<QuoteTemplate> = templates
            .values()
            .filter(|template| &template.tenant_id == tenant && template.is_active)
            .filter(|template| category.map_or(true, |wanted| template.category == wanted))
            .cloned()
            .collect();
        listed.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(listed)
    }

    async fn deactivate_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut templates = self.templates.write().await;
        match templates.get_mut(&id.0) {
            Some(template) if &template.tenant_id == tenant && template.is_active => {
                template.is_active = false;
                template.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
