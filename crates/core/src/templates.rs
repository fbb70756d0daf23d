//! Templates, copies and new revisions. All three stamp a fresh draft from an
//! existing set of lines; none of them carry review or lock state across.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::concurrency::VersionGuard;
use crate::domain::customer::CustomerId;
use crate::domain::quote::{Quote, QuoteId, QuoteItem, QuoteItemInput};
use crate::domain::template::{infer_category, QuoteTemplate, TemplateId};
use crate::engine::{Caller, QuoteEngine, QuoteMutation};
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::QuoteEvent;

#[derive(Clone, Debug, Default)]
pub struct TemplateDraft {
    pub name: String,
    pub description: Option<String>,
    /// Inferred from the item categories when absent.
    pub category: Option<String>,
}

pub fn template_from_quote(
    quote: &Quote,
    draft: TemplateDraft,
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<QuoteTemplate, DomainError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(DomainError::Validation("template name must not be blank".to_owned()));
    }
    if quote.is_bundle() {
        return Err(DomainError::Validation(format!(
            "bundle `{}` has no lines of its own to save as a template",
            quote.id
        )));
    }

    let category = match draft.category.map(|category| category.trim().to_uppercase()) {
        Some(category) if !category.is_empty() => category,
        _ => infer_category(&quote.items),
    };

    Ok(QuoteTemplate {
        id: TemplateId::generate(),
        tenant_id: quote.tenant_id.clone(),
        name: name.to_owned(),
        description: draft.description,
        category,
        source_quote_id: Some(quote.id.clone()),
        discount_rate: quote.discount_rate,
        items: quote.items.iter().map(QuoteItemInput::from).collect(),
        is_active: true,
        created_by: created_by.to_owned(),
        created_at: now,
        updated_at: now,
    })
}

/// Fresh lines with new ids and re-derived subtotals.
pub fn copy_items(items: &[QuoteItem]) -> Result<Vec<QuoteItem>, DomainError> {
    items.iter().map(|item| QuoteItemInput::from(item).into_item()).collect()
}

/// Copies lines, pricing and customer data onto a new draft. Status, version,
/// review metadata and the lock never travel.
pub fn draft_from_source(
    source: &Quote,
    caller: &Caller,
    customer_id: Option<CustomerId>,
    now: DateTime<Utc>,
) -> Result<Quote, DomainError> {
    let mut quote = Quote::new_draft(caller.tenant_id.clone(), &caller.user_id, now);
    quote.customer_id = customer_id.or_else(|| source.customer_id.clone());
    quote.title = source.title.clone();
    quote.items = copy_items(&source.items)?;
    quote.set_discount_rate(source.discount_rate)?;
    Ok(quote)
}

fn draft_from_template(
    template: &QuoteTemplate,
    caller: &Caller,
    customer_id: Option<CustomerId>,
    now: DateTime<Utc>,
) -> Result<Quote, DomainError> {
    let mut quote = Quote::new_draft(caller.tenant_id.clone(), &caller.user_id, now);
    quote.customer_id = customer_id;
    quote.title = Some(template.name.clone());
    quote.items = template
        .items
        .iter()
        .cloned()
        .map(QuoteItemInput::into_item)
        .collect::<Result<Vec<_>, _>>()?;
    quote.set_discount_rate(template.discount_rate)?;
    Ok(quote)
}

impl QuoteEngine {
    /// Snapshots a quote's lines and rate. The source quote is not written.
    pub async fn save_as_template(
        &self,
        caller: &Caller,
        quote_id: &QuoteId,
        draft: TemplateDraft,
    ) -> Result<QuoteTemplate, ApplicationError> {
        let now = self.clock.now();
        let quote = self.load(caller, quote_id).await?;
        let template = template_from_quote(&quote, draft, &caller.user_id, now)?;
        self.templates.insert_template(&template).await?;

        info!(
            event_name = "template.saved",
            tenant_id = %caller.tenant_id,
            template_id = %template.id.0,
            quote_id = %quote_id,
            category = %template.category,
            "quote saved as template"
        );
        self.record(
            AuditEvent::new(
                caller.tenant_id.clone(),
                Some(quote_id.clone()),
                "template.saved",
                AuditCategory::Template,
                caller.user_id.as_str(),
                AuditOutcome::Success,
                now,
            )
            .with_metadata("template_id", template.id.0.as_str())
            .with_metadata("items", template.items.len()),
        );
        Ok(template)
    }

    pub async fn create_from_template(
        &self,
        caller: &Caller,
        template_id: &TemplateId,
        customer_id: Option<CustomerId>,
        valid_days: u32,
    ) -> Result<QuoteMutation, ApplicationError> {
        let now = self.clock.now();
        let template = self
            .templates
            .find_template(&caller.tenant_id, template_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "template",
                id: template_id.0.clone(),
            })?;

        let mut quote = draft_from_template(&template, caller, customer_id, now)?;
        quote.set_validity(now, valid_days)?;
        let source = template_id.0.as_str();
        self.insert_draft(caller, quote, "quote.created_from_template", Some(source)).await
    }

    /// Any status can be copied; the copy is a standalone draft of its own family.
    pub async fn copy_quote(
        &self,
        caller: &Caller,
        source_id: &QuoteId,
        customer_id: Option<CustomerId>,
    ) -> Result<QuoteMutation, ApplicationError> {
        let now = self.clock.now();
        let source = self.load(caller, source_id).await?;
        if source.is_bundle() {
            return Err(DomainError::Validation(format!(
                "bundle `{source_id}` cannot be copied; copy its child quotes instead"
            ))
            .into());
        }

        let mut quote = draft_from_source(&source, caller, customer_id, now)?;
        quote.set_validity(now, self.settings.default_valid_days)?;
        self.insert_draft(caller, quote, "quote.copied", Some(source_id.0.as_str())).await
    }

    /// Starts the next revision in the source's family and retires the source.
    ///
    /// Retiring the source and inserting the revision is one store write under
    /// the version guard; a stale `expected_version` or a failed write leaves
    /// the source active and the family unchanged.
    pub async fn create_next_version(
        &self,
        caller: &Caller,
        source_id: &QuoteId,
        expected_version: u32,
    ) -> Result<QuoteMutation, ApplicationError> {
        let now = self.clock.now();
        let mut source = self.load(caller, source_id).await?;
        VersionGuard::check(&source, expected_version)?;
        if !source.is_active {
            return Err(DomainError::Validation(format!(
                "quote `{source_id}` has already been superseded"
            ))
            .into());
        }
        if source.is_bundle() {
            return Err(DomainError::Validation(format!(
                "bundle `{source_id}` is revised through its child quotes"
            ))
            .into());
        }

        let mut quote = draft_from_source(&source, caller, None, now)?;
        quote.root_quote_id = source.root_quote_id.clone();
        quote.revision = source.revision.checked_add(1).ok_or_else(|| {
            DomainError::InvariantViolation(format!("revision counter of `{source_id}` overflowed"))
        })?;
        quote.bundle_id = source.bundle_id.clone();
        quote.set_validity(now, self.settings.default_valid_days)?;
        quote.reprice();
        quote.check_pricing_invariants()?;

        let assessment = self.assess(&quote, now).await?;
        if assessment.risk.hard_stop {
            return Err(self.blocked(caller, &quote, &assessment.risk, QuoteEvent::Edit, now));
        }

        source.is_active = false;
        VersionGuard::stage(&mut source, expected_version, now)?;
        let outcome = self.quotes.replace_revision(&source, expected_version, &quote).await?;
        VersionGuard::settle(&source, expected_version, outcome)?;

        info!(
            event_name = "quote.revision_created",
            tenant_id = %caller.tenant_id,
            quote_id = %quote.id,
            source_quote_id = %source_id,
            revision = quote.revision,
            version = quote.version,
            "next quote revision created"
        );
        self.record(
            AuditEvent::new(
                caller.tenant_id.clone(),
                Some(quote.id.clone()),
                "quote.revision_created",
                AuditCategory::Lifecycle,
                caller.user_id.as_str(),
                AuditOutcome::Success,
                now,
            )
            .with_metadata("source_quote_id", source_id.0.as_str())
            .with_metadata("root_quote_id", quote.root_quote_id.0.as_str())
            .with_metadata("revision", quote.revision),
        );
        self.recompute_parent(caller, &quote).await;
        Ok(QuoteMutation { quote, risk: assessment.risk })
    }

    /// Active templates of the caller's tenant, newest first.
    pub async fn list_templates(
        &self,
        caller: &Caller,
        category: Option<&str>,
    ) -> Result<Vec<QuoteTemplate>, ApplicationError> {
        Ok(self.templates.list_templates(&caller.tenant_id, category).await?)
    }

    /// Soft delete: the template stops being listed or usable.
    pub async fn delete_template(
        &self,
        caller: &Caller,
        template_id: &TemplateId,
    ) -> Result<(), ApplicationError> {
        let now = self.clock.now();
        let removed =
            self.templates.deactivate_template(&caller.tenant_id, template_id, now).await?;
        if !removed {
            return Err(ApplicationError::NotFound {
                entity: "template",
                id: template_id.0.clone(),
            });
        }

        info!(
            event_name = "template.deleted",
            tenant_id = %caller.tenant_id,
            template_id = %template_id.0,
            "template deactivated"
        );
        self.record(
            AuditEvent::new(
                caller.tenant_id.clone(),
                None,
                "template.deleted",
                AuditCategory::Template,
                caller.user_id.as_str(),
                AuditOutcome::Success,
                now,
            )
            .with_metadata("template_id", template_id.0.as_str()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{copy_items, draft_from_source, template_from_quote, TemplateDraft};
    use crate::domain::customer::{CustomerId, TenantId};
    use crate::domain::quote::{Quote, QuoteItemInput, QuoteStatus};
    use crate::domain::template::CATEGORY_WALLPAPER;
    use crate::engine::Caller;

    fn reviewed_quote() -> Quote {
        let mut quote = Quote::new_draft(TenantId("t-1".to_owned()), "sales-1", Utc::now());
        quote.customer_id = Some(CustomerId("c-1".to_owned()));
        quote.items = vec![QuoteItemInput {
            product_id: None,
            product_name: "linen wallcloth".to_owned(),
            category: Some("WALLCLOTH".to_owned()),
            quantity: Decimal::from(3),
            unit_cost: Decimal::from(40),
            unit_price: Decimal::from(90),
        }
        .into_item()
        .expect("valid item")];
        quote.set_discount_rate(Decimal::new(95, 2)).expect("valid rate");
        quote.reprice();
        quote.status = QuoteStatus::Approved;
        quote.version = 6;
        quote.approved_by = Some("manager-1".to_owned());
        quote.locked_at = Some(Utc::now());
        quote
    }

    #[test]
    fn template_snapshot_infers_category_and_keeps_rate() {
        let quote = reviewed_quote();
        let draft = TemplateDraft { name: "  study wall ".to_owned(), ..Default::default() };
        let template = template_from_quote(&quote, draft, "sales-2", Utc::now()).expect("template");

        assert_eq!(template.name, "study wall");
        assert_eq!(template.category, CATEGORY_WALLPAPER);
        assert_eq!(template.discount_rate, Decimal::new(95, 2));
        assert_eq!(template.source_quote_id, Some(quote.id.clone()));
        assert_eq!(template.items.len(), 1);
    }

    #[test]
    fn blank_template_name_is_rejected() {
        let draft = TemplateDraft { name: "   ".to_owned(), ..Default::default() };
        assert!(template_from_quote(&reviewed_quote(), draft, "sales-2", Utc::now()).is_err());
    }

    #[test]
    fn copies_never_carry_review_or_lock_state() {
        let source = reviewed_quote();
        let caller = Caller::new("t-1", "sales-2");
        let mut copy = draft_from_source(&source, &caller, None, Utc::now()).expect("copy");
        copy.reprice();

        assert_ne!(copy.id, source.id);
        assert_eq!(copy.root_quote_id, copy.id);
        assert_eq!(copy.status, QuoteStatus::Draft);
        assert_eq!(copy.version, 0);
        assert!(copy.approved_by.is_none());
        assert!(!copy.is_locked());
        assert_eq!(copy.customer_id, source.customer_id);
        assert_eq!(copy.final_amount, source.final_amount);
        assert_eq!(copy.created_by, "sales-2");
    }

    #[test]
    fn copied_items_get_fresh_ids() {
        let source = reviewed_quote();
        let items = copy_items(&source.items).expect("copy");
        assert_ne!(items[0].id, source.items[0].id);
        assert_eq!(items[0].subtotal, source.items[0].subtotal);
    }
}
