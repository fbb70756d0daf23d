//! Quote lifecycle service.
//!
//! Every mutating call reads the current row, checks the caller's expected
//! version, runs the lifecycle table and the risk checks, and writes through a
//! version-conditional store update. Audit, order hand-off and bundle rollups
//! run after the write has committed and never undo it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::bundle;
use crate::clock::{Clock, SystemClock};
use crate::concurrency::VersionGuard;
use crate::config::LifecycleConfig;
use crate::cpq::policy::PolicyResolver;
use crate::cpq::pricing::{reprice_from_catalog, PriceCatalog, PriceRefresh, StaticPriceCatalog};
use crate::cpq::risk::{evaluate, evaluate_quote, RiskCheckResult, RiskFinding};
use crate::domain::customer::{CustomerId, TenantId};
use crate::domain::quote::{
    Quote, QuoteId, QuoteItemId, QuoteItemInput, QuoteItemPatch, QuoteKind, QuoteStatus,
};
use crate::errors::{ApplicationError, DomainError};
use crate::handoff::{HandoffKind, NoopOrderHandoff, OrderHandoff};
use crate::lifecycle::{
    transition, LifecycleAction, QuoteEvent, TransitionContext, TransitionOutcome,
};
use crate::money::{ratio, round_currency};
use crate::store::{QuoteStore, TemplateStore};

/// Recorded as approver when a submit skips review.
pub const AUTO_APPROVER: &str = "system:auto-approve";

/// Who is calling, already resolved by the session layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: TenantId,
    pub user_id: String,
}

impl Caller {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { tenant_id: TenantId(tenant_id.into()), user_id: user_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub default_valid_days: u32,
    pub bundle_recompute_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { default_valid_days: 30, bundle_recompute_retries: 3 }
    }
}

impl From<&LifecycleConfig> for EngineSettings {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            default_valid_days: config.default_valid_days,
            bundle_recompute_retries: config.bundle_recompute_retries,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewQuote {
    pub customer_id: Option<CustomerId>,
    pub title: Option<String>,
    /// Places the quote inside an existing bundle.
    pub bundle_id: Option<QuoteId>,
    pub items: Vec<QuoteItemInput>,
    pub discount_rate: Option<Decimal>,
    pub valid_days: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct NewBundle {
    pub customer_id: Option<CustomerId>,
    pub title: Option<String>,
    pub valid_days: Option<u32>,
}

/// Partial update. `None` leaves a field as stored.
#[derive(Clone, Debug, Default)]
pub struct QuoteEdit {
    pub customer_id: Option<CustomerId>,
    pub title: Option<String>,
    pub items: Option<Vec<QuoteItemInput>>,
    pub discount_rate: Option<Decimal>,
    pub valid_days: Option<u32>,
}

impl QuoteEdit {
    fn touches_pricing(&self) -> bool {
        self.items.is_some() || self.discount_rate.is_some()
    }
}

/// A committed quote plus the soft-risk findings the caller should surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteMutation {
    pub quote: Quote,
    pub risk: RiskCheckResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub quote: Quote,
    pub risk: RiskCheckResult,
    pub price: PriceRefresh,
}

pub(crate) struct Assessment {
    pub(crate) risk: RiskCheckResult,
    /// `final / original`, the figure the approval threshold is compared against.
    pub(crate) effective_rate: Decimal,
}

pub struct QuoteEngine {
    pub(crate) quotes: Arc<dyn QuoteStore>,
    pub(crate) templates: Arc<dyn TemplateStore>,
    pub(crate) policies: Arc<dyn PolicyResolver>,
    pub(crate) catalog: Arc<dyn PriceCatalog>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) handoff: Arc<dyn OrderHandoff>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: EngineSettings,
}

impl QuoteEngine {
    pub fn new(
        quotes: Arc<dyn QuoteStore>,
        templates: Arc<dyn TemplateStore>,
        policies: Arc<dyn PolicyResolver>,
    ) -> Self {
        Self {
            quotes,
            templates,
            policies,
            catalog: Arc::new(StaticPriceCatalog::default()),
            audit: Arc::new(TracingAuditSink),
            handoff: Arc::new(NoopOrderHandoff),
            clock: Arc::new(SystemClock),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn PriceCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_order_handoff(mut self, handoff: Arc<dyn OrderHandoff>) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn create_quote(
        &self,
        caller: &Caller,
        input: NewQuote,
    ) -> Result<QuoteMutation, ApplicationError> {
        let now = self.clock.now();
        let mut quote = Quote::new_draft(caller.tenant_id.clone(), &caller.user_id, now);
        quote.customer_id = input.customer_id;
        quote.title = input.title;

        if let Some(bundle_id) = input.bundle_id {
            let parent = self.load(caller, &bundle_id).await?;
            if !parent.is_bundle() {
                return Err(DomainError::Validation(format!(
                    "quote `{bundle_id}` is not a bundle"
                ))
                .into());
            }
            let parent_status = parent.effective_status(now);
            if parent_status != QuoteStatus::Draft {
                return Err(DomainError::InvalidStateTransition {
                    from: parent_status,
                    event: QuoteEvent::Edit,
                }
                .into());
            }
            quote.root_quote_id = parent.id.clone();
            quote.bundle_id = Some(parent.id);
        }

        quote.items = input
            .items
            .into_iter()
            .map(QuoteItemInput::into_item)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(rate) = input.discount_rate {
            quote.set_discount_rate(rate)?;
        }
        quote.set_validity(now, input.valid_days.unwrap_or(self.settings.default_valid_days))?;

        self.insert_draft(caller, quote, "quote.created", None).await
    }

    pub async fn create_bundle(
        &self,
        caller: &Caller,
        input: NewBundle,
    ) -> Result<Quote, ApplicationError> {
        let now = self.clock.now();
        let mut quote = Quote::new_draft(caller.tenant_id.clone(), &caller.user_id, now);
        quote.kind = QuoteKind::Bundle;
        quote.customer_id = input.customer_id;
        quote.title = input.title;
        quote.set_validity(now, input.valid_days.unwrap_or(self.settings.default_valid_days))?;

        self.quotes.insert_quote(&quote).await?;
        info!(
            event_name = "bundle.created",
            tenant_id = %caller.tenant_id,
            quote_id = %quote.id,
            "bundle created"
        );
        self.record(
            AuditEvent::new(
                caller.tenant_id.clone(),
                Some(quote.id.clone()),
                "bundle.created",
                AuditCategory::Lifecycle,
                caller.user_id.as_str(),
                AuditOutcome::Success,
                now,
            )
            .with_metadata("quote_no", quote.quote_no.as_str()),
        );
        Ok(quote)
    }

    /// Reads a quote with lazy expiration applied to the returned status.
    pub async fn get_quote(
        &self,
        caller: &Caller,
        id: &QuoteId,
    ) -> Result<Quote, ApplicationError> {
        let mut quote = self.load(caller, id).await?;
        quote.status = quote.effective_status(self.clock.now());
        Ok(quote)
    }

    /// Read-only risk preview of the stored quote.
    pub async fn evaluate_risk(
        &self,
        caller: &Caller,
        id: &QuoteId,
    ) -> Result<RiskCheckResult, ApplicationError> {
        let quote = self.load(caller, id).await?;
        Ok(self.assess(&quote, self.clock.now()).await?.risk)
    }

    pub async fn update_quote(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        edit: QuoteEdit,
    ) -> Result<QuoteMutation, ApplicationError> {
        self.edit_quote(caller, id, expected_version, move |quote, now| {
            if quote.is_bundle() && edit.touches_pricing() {
                return Err(bundle_pricing_error(quote));
            }
            if let Some(customer_id) = edit.customer_id {
                quote.customer_id = Some(customer_id);
            }
            if let Some(title) = edit.title {
                quote.title = Some(title);
            }
            if let Some(items) = edit.items {
                quote.items = items
                    .into_iter()
                    .map(QuoteItemInput::into_item)
                    .collect::<Result<Vec<_>, _>>()?;
            }
            if let Some(rate) = edit.discount_rate {
                quote.set_discount_rate(rate)?;
            }
            if let Some(valid_days) = edit.valid_days {
                quote.set_validity(now, valid_days)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn add_item(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        item: QuoteItemInput,
    ) -> Result<QuoteMutation, ApplicationError> {
        self.edit_quote(caller, id, expected_version, move |quote, _| {
            if quote.is_bundle() {
                return Err(bundle_pricing_error(quote));
            }
            quote.items.push(item.into_item()?);
            Ok(())
        })
        .await
    }

    pub async fn remove_item(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        item_id: &QuoteItemId,
    ) -> Result<QuoteMutation, ApplicationError> {
        let item_id = item_id.clone();
        self.edit_quote(caller, id, expected_version, move |quote, _| {
            if quote.is_bundle() {
                return Err(bundle_pricing_error(quote));
            }
            let position = quote
                .items
                .iter()
                .position(|item| item.id == item_id)
                .ok_or_else(|| ApplicationError::NotFound {
                    entity: "quote item",
                    id: item_id.0.clone(),
                })?;
            quote.items.remove(position);
            Ok(())
        })
        .await
    }

    /// Edits one line in place; the line keeps its id and position.
    pub async fn update_item(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        item_id: &QuoteItemId,
        patch: QuoteItemPatch,
    ) -> Result<QuoteMutation, ApplicationError> {
        let item_id = item_id.clone();
        self.edit_quote(caller, id, expected_version, move |quote, _| {
            if quote.is_bundle() {
                return Err(bundle_pricing_error(quote));
            }
            let item = quote.items.iter_mut().find(|item| item.id == item_id).ok_or_else(
                || ApplicationError::NotFound { entity: "quote item", id: item_id.0.clone() },
            )?;
            patch.apply(item)?;
            Ok(())
        })
        .await
    }

    /// Sets the display order of the lines. `order` must name every line once.
    pub async fn reorder_items(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        order: Vec<QuoteItemId>,
    ) -> Result<QuoteMutation, ApplicationError> {
        self.edit_quote(caller, id, expected_version, move |quote, _| {
            if quote.is_bundle() {
                return Err(bundle_pricing_error(quote));
            }
            if order.len() != quote.items.len() {
                return Err(DomainError::Validation(format!(
                    "reorder names {} lines but quote `{}` has {}",
                    order.len(),
                    quote.id,
                    quote.items.len()
                ))
                .into());
            }
            let mut remaining = std::mem::take(&mut quote.items);
            let mut ordered = Vec::with_capacity(remaining.len());
            for item_id in &order {
                let Some(position) = remaining.iter().position(|item| &item.id == item_id) else {
                    return Err(DomainError::Validation(format!(
                        "line `{}` is not on quote `{}` or is listed twice",
                        item_id.0, quote.id
                    ))
                    .into());
                };
                ordered.push(remaining.swap_remove(position));
            }
            quote.items = ordered;
            Ok(())
        })
        .await
    }

    pub async fn submit(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
    ) -> Result<QuoteMutation, ApplicationError> {
        let now = self.clock.now();
        let mut quote = self.load(caller, id).await?;
        VersionGuard::check(&quote, expected_version)?;
        ensure_current_revision(&quote)?;

        let policy = self.policies.resolve_policy(&caller.tenant_id);
        let lifecycle = self.policies.resolve_lifecycle(&caller.tenant_id);
        let status = quote.effective_status(now);
        let mut context = TransitionContext {
            locked: quote.is_locked(),
            allow_review_edits: lifecycle.allow_review_edits,
            auto_approve: false,
        };
        transition(status, QuoteEvent::Submit, &context)?;

        let assessment = self.assess(&quote, now).await?;
        if assessment.risk.hard_stop {
            return Err(self.blocked(caller, &quote, &assessment.risk, QuoteEvent::Submit, now));
        }

        // Rates under the threshold always go through review.
        context.auto_approve = lifecycle.auto_approve_within_threshold
            && !policy.requires_approval(assessment.effective_rate)
            && !assessment.risk.is_risk;
        let outcome = transition(status, QuoteEvent::Submit, &context)?;

        quote.status = outcome.to;
        quote.submitted_by = Some(caller.user_id.clone());
        quote.submitted_at = Some(now);
        if outcome.to == QuoteStatus::Approved {
            quote.approved_by = Some(AUTO_APPROVER.to_owned());
            quote.approved_at = Some(now);
        }

        self.commit(&mut quote, expected_version, now).await?;
        self.finish(
            caller,
            &quote,
            &outcome,
            vec![
                ("discount_rate", assessment.effective_rate.to_string()),
                ("soft_risk", assessment.risk.is_risk.to_string()),
            ],
        )
        .await;
        Ok(QuoteMutation { quote, risk: assessment.risk })
    }

    pub async fn approve(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
    ) -> Result<Quote, ApplicationError> {
        let now = self.clock.now();
        let mut quote = self.load(caller, id).await?;
        VersionGuard::check(&quote, expected_version)?;

        let outcome = self.review_transition(caller, &quote, QuoteEvent::Approve, now)?;
        quote.status = outcome.to;
        quote.approved_by = Some(caller.user_id.clone());
        quote.approved_at = Some(now);

        self.commit(&mut quote, expected_version, now).await?;
        self.finish(caller, &quote, &outcome, Vec::new()).await;
        Ok(quote)
    }

    pub async fn reject(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        reason: &str,
    ) -> Result<Quote, ApplicationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::Validation("a rejection reason is required".to_owned()).into());
        }

        let now = self.clock.now();
        let mut quote = self.load(caller, id).await?;
        VersionGuard::check(&quote, expected_version)?;

        let outcome = self.review_transition(caller, &quote, QuoteEvent::Reject, now)?;
        quote.status = outcome.to;
        quote.rejected_by = Some(caller.user_id.clone());
        quote.reject_reason = Some(reason.to_owned());

        self.commit(&mut quote, expected_version, now).await?;
        self.finish(caller, &quote, &outcome, vec![("reason", reason.to_owned())]).await;
        Ok(quote)
    }

    /// Re-opens a rejected quote as a draft. The version keeps counting.
    pub async fn revise(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
    ) -> Result<Quote, ApplicationError> {
        self.simple_transition(caller, id, expected_version, QuoteEvent::Revise, |quote, _| {
            quote.clear_review_metadata();
        })
        .await
    }

    pub async fn convert(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
    ) -> Result<Quote, ApplicationError> {
        self.simple_transition(caller, id, expected_version, QuoteEvent::Convert, |_, _| {}).await
    }

    pub async fn lock(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
    ) -> Result<Quote, ApplicationError> {
        let quote = self.load(caller, id).await?;
        if quote.is_locked() {
            return Err(DomainError::Validation(format!("quote `{id}` is already locked")).into());
        }
        self.simple_transition(caller, id, expected_version, QuoteEvent::Lock, |quote, now| {
            quote.locked_at = Some(now);
        })
        .await
    }

    pub async fn unlock(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
    ) -> Result<Quote, ApplicationError> {
        let quote = self.load(caller, id).await?;
        if !quote.is_locked() {
            return Err(DomainError::Validation(format!("quote `{id}` is not locked")).into());
        }
        self.simple_transition(caller, id, expected_version, QuoteEvent::Unlock, |quote, _| {
            quote.locked_at = None;
        })
        .await
    }

    /// Moves the quote onto current catalog prices, restarts its validity window
    /// and returns it to draft.
    pub async fn refresh(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        valid_days: Option<u32>,
    ) -> Result<RefreshOutcome, ApplicationError> {
        let now = self.clock.now();
        let mut quote = self.load(caller, id).await?;
        VersionGuard::check(&quote, expected_version)?;
        ensure_current_revision(&quote)?;
        if quote.is_bundle() {
            return Err(DomainError::Validation(
                "bundles are refreshed through their child quotes".to_owned(),
            )
            .into());
        }

        let lifecycle = self.policies.resolve_lifecycle(&caller.tenant_id);
        let context = TransitionContext {
            locked: quote.is_locked(),
            allow_review_edits: lifecycle.allow_review_edits,
            auto_approve: false,
        };
        let outcome = transition(quote.effective_status(now), QuoteEvent::Refresh, &context)?;

        quote.set_validity(now, valid_days.unwrap_or(self.settings.default_valid_days))?;
        let price = reprice_from_catalog(&mut quote, self.catalog.as_ref()).await?;
        quote.check_pricing_invariants()?;
        quote.status = outcome.to;
        quote.clear_review_metadata();

        let assessment = self.assess(&quote, now).await?;
        if assessment.risk.hard_stop {
            return Err(self.blocked(caller, &quote, &assessment.risk, QuoteEvent::Refresh, now));
        }

        self.commit(&mut quote, expected_version, now).await?;
        self.finish(
            caller,
            &quote,
            &outcome,
            vec![
                ("previous_final", price.previous_final.to_string()),
                ("new_final", price.new_final.to_string()),
                ("final_delta", price.final_delta().to_string()),
                ("repriced_items", price.repriced_items.to_string()),
            ],
        )
        .await;
        Ok(RefreshOutcome { quote, risk: assessment.risk, price })
    }

    pub(crate) async fn load(
        &self,
        caller: &Caller,
        id: &QuoteId,
    ) -> Result<Quote, ApplicationError> {
        self.quotes
            .find_quote(&caller.tenant_id, id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound { entity: "quote", id: id.0.clone() })
    }

    /// Risk of a standalone quote, or of a bundle's counted children taken together.
    pub(crate) async fn assess(
        &self,
        quote: &Quote,
        now: DateTime<Utc>,
    ) -> Result<Assessment, ApplicationError> {
        let policy = self.policies.resolve_policy(&quote.tenant_id);
        if !quote.is_bundle() {
            return Ok(Assessment {
                risk: evaluate_quote(quote, &policy),
                effective_rate: quote.discount_rate,
            });
        }

        let lifecycle = self.policies.resolve_lifecycle(&quote.tenant_id);
        let children = self.quotes.list_bundle_children(&quote.tenant_id, &quote.id).await?;
        let scope = bundle::risk_scope(&children, now, &lifecycle);
        Ok(Assessment {
            risk: evaluate(&scope.items, scope.final_amount, scope.original_amount, &policy),
            effective_rate: ratio(scope.final_amount, scope.original_amount)
                .unwrap_or(Decimal::ONE),
        })
    }

    /// Stages the next version and writes it only if nobody else got there first.
    pub(crate) async fn commit(
        &self,
        quote: &mut Quote,
        expected_version: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        VersionGuard::stage(quote, expected_version, now)?;
        let outcome = self.quotes.update_quote(quote, expected_version).await?;
        let settled = VersionGuard::settle(quote, expected_version, outcome);
        if settled.is_err() {
            warn!(
                event_name = "quote.version_conflict",
                tenant_id = %quote.tenant_id,
                quote_id = %quote.id,
                expected_version,
                "quote changed underneath the caller; write skipped"
            );
        }
        settled
    }

    pub(crate) fn record(&self, event: AuditEvent) {
        let event_type = event.event_type.clone();
        if let Err(error) = self.audit.emit(event) {
            warn!(
                event_name = "audit.emit_failed",
                audit_event = %event_type,
                error = %error,
                "audit sink rejected event"
            );
        }
    }

    /// Rolls the change up into the parent bundle. A failed rollup is logged; the
    /// next child change or an explicit recompute repairs it.
    pub(crate) async fn recompute_parent(&self, caller: &Caller, quote: &Quote) {
        let Some(bundle_id) = quote.bundle_id.as_ref() else {
            return;
        };
        if let Err(error) = self.recompute_bundle_total(caller, bundle_id).await {
            warn!(
                event_name = "bundle.recompute_failed",
                tenant_id = %caller.tenant_id,
                bundle_id = %bundle_id,
                error = %error,
                "bundle rollup did not complete"
            );
        }
    }

    /// Prices, risk-checks and inserts a brand-new draft. `source` names the quote
    /// or template it was stamped from.
    pub(crate) async fn insert_draft(
        &self,
        caller: &Caller,
        mut quote: Quote,
        event_type: &'static str,
        source: Option<&str>,
    ) -> Result<QuoteMutation, ApplicationError> {
        let now = quote.created_at;
        quote.reprice();
        quote.check_pricing_invariants()?;

        let assessment = self.assess(&quote, now).await?;
        if assessment.risk.hard_stop {
            return Err(self.blocked(caller, &quote, &assessment.risk, QuoteEvent::Edit, now));
        }

        self.quotes.insert_quote(&quote).await?;
        info!(
            event_name = event_type,
            tenant_id = %caller.tenant_id,
            quote_id = %quote.id,
            version = quote.version,
            final_amount = %quote.final_amount,
            "draft quote created"
        );
        let mut event = AuditEvent::new(
            caller.tenant_id.clone(),
            Some(quote.id.clone()),
            event_type,
            AuditCategory::Lifecycle,
            caller.user_id.as_str(),
            AuditOutcome::Success,
            now,
        )
        .with_metadata("quote_no", quote.quote_no.as_str())
        .with_metadata("final_amount", quote.final_amount)
        .with_metadata("root_quote_id", quote.root_quote_id.0.as_str());
        if let Some(source) = source {
            event = event.with_metadata("source", source);
        }
        self.record(event);
        self.recompute_parent(caller, &quote).await;
        Ok(QuoteMutation { quote, risk: assessment.risk })
    }

    async fn edit_quote<F>(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        change: F,
    ) -> Result<QuoteMutation, ApplicationError>
    where
        F: FnOnce(&mut Quote, DateTime<Utc>) -> Result<(), ApplicationError> + Send,
    {
        let now = self.clock.now();
        let mut quote = self.load(caller, id).await?;
        VersionGuard::check(&quote, expected_version)?;
        ensure_current_revision(&quote)?;

        let lifecycle = self.policies.resolve_lifecycle(&caller.tenant_id);
        let context = TransitionContext {
            locked: quote.is_locked(),
            allow_review_edits: lifecycle.allow_review_edits,
            auto_approve: false,
        };
        let outcome = transition(quote.effective_status(now), QuoteEvent::Edit, &context)?;

        change(&mut quote, now)?;
        if !quote.is_bundle() {
            quote.reprice();
            quote.check_pricing_invariants()?;
        }

        let assessment = self.assess(&quote, now).await?;
        if assessment.risk.hard_stop {
            return Err(self.blocked(caller, &quote, &assessment.risk, QuoteEvent::Edit, now));
        }

        self.commit(&mut quote, expected_version, now).await?;
        self.finish(
            caller,
            &quote,
            &outcome,
            vec![("final_amount", quote.final_amount.to_string())],
        )
        .await;
        Ok(QuoteMutation { quote, risk: assessment.risk })
    }

    async fn simple_transition<F>(
        &self,
        caller: &Caller,
        id: &QuoteId,
        expected_version: u32,
        event: QuoteEvent,
        change: F,
    ) -> Result<Quote, ApplicationError>
    where
        F: FnOnce(&mut Quote, DateTime<Utc>) + Send,
    {
        let now = self.clock.now();
        let mut quote = self.load(caller, id).await?;
        VersionGuard::check(&quote, expected_version)?;

        let lifecycle = self.policies.resolve_lifecycle(&caller.tenant_id);
        let context = TransitionContext {
            locked: quote.is_locked(),
            allow_review_edits: lifecycle.allow_review_edits,
            auto_approve: false,
        };
        let outcome = transition(quote.effective_status(now), event, &context)?;
        quote.status = outcome.to;
        change(&mut quote, now);

        self.commit(&mut quote, expected_version, now).await?;
        self.finish(caller, &quote, &outcome, Vec::new()).await;
        Ok(quote)
    }

    /// Approve and reject share the table check and the segregation-of-duties guard.
    fn review_transition(
        &self,
        caller: &Caller,
        quote: &Quote,
        event: QuoteEvent,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let lifecycle = self.policies.resolve_lifecycle(&caller.tenant_id);
        let context = TransitionContext {
            locked: quote.is_locked(),
            allow_review_edits: lifecycle.allow_review_edits,
            auto_approve: false,
        };
        let outcome = transition(quote.effective_status(now), event, &context)?;

        if lifecycle.require_segregation_of_duties
            && quote.submitted_by.as_deref() == Some(caller.user_id.as_str())
        {
            warn!(
                event_name = "quote.segregation_violation",
                tenant_id = %caller.tenant_id,
                quote_id = %quote.id,
                attempted = %event,
                actor = %caller.user_id,
                "submitter tried to review their own quote"
            );
            self.record(
                AuditEvent::new(
                    caller.tenant_id.clone(),
                    Some(quote.id.clone()),
                    format!("quote.{event}"),
                    AuditCategory::Lifecycle,
                    caller.user_id.as_str(),
                    AuditOutcome::Rejected,
                    now,
                )
                .with_metadata("reason", "segregation_of_duties"),
            );
            return Err(DomainError::SegregationOfDutiesViolation {
                approver: caller.user_id.clone(),
            }
            .into());
        }

        Ok(outcome)
    }

    pub(crate) fn blocked(
        &self,
        caller: &Caller,
        quote: &Quote,
        risk: &RiskCheckResult,
        event: QuoteEvent,
        now: DateTime<Utc>,
    ) -> ApplicationError {
        warn!(
            event_name = "quote.blocked",
            tenant_id = %caller.tenant_id,
            quote_id = %quote.id,
            attempted = %event,
            reasons = ?risk.reasons,
            "hard stop blocked the change"
        );
        self.record(
            AuditEvent::new(
                caller.tenant_id.clone(),
                Some(quote.id.clone()),
                format!("quote.{event}"),
                AuditCategory::Pricing,
                caller.user_id.as_str(),
                AuditOutcome::Rejected,
                now,
            )
            .with_metadata("reason", risk.reasons.join("; ")),
        );

        match risk.negative_margin() {
            Some(RiskFinding::NegativeMargin { total_cost, final_amount, gap }) => {
                DomainError::NegativeMarginBlocked {
                    total_cost: round_currency(*total_cost),
                    final_amount: round_currency(*final_amount),
                    gap: round_currency(*gap),
                }
                .into()
            }
            _ => DomainError::InvariantViolation(
                "hard stop raised without a negative-margin finding".to_owned(),
            )
            .into(),
        }
    }

    async fn finish(
        &self,
        caller: &Caller,
        quote: &Quote,
        outcome: &TransitionOutcome,
        details: Vec<(&'static str, String)>,
    ) {
        info!(
            event_name = "quote.transition_applied",
            tenant_id = %caller.tenant_id,
            quote_id = %quote.id,
            event = %outcome.event,
            from = %outcome.from,
            to = %outcome.to,
            version = quote.version,
            "quote transition committed"
        );

        if outcome.requires(LifecycleAction::RecomputeBundle) {
            self.recompute_parent(caller, quote).await;
        }

        if outcome.requires(LifecycleAction::NotifyOrderHandoff) {
            let kind = match outcome.to {
                QuoteStatus::Converted => Some(HandoffKind::Converted),
                QuoteStatus::Approved => Some(HandoffKind::Approved),
                _ => None,
            };
            if let Some(kind) = kind {
                if let Err(error) = self.handoff.notify(kind, quote).await {
                    warn!(
                        event_name = "quote.handoff_failed",
                        tenant_id = %caller.tenant_id,
                        quote_id = %quote.id,
                        error = %error,
                        "order hand-off notification failed"
                    );
                }
            }
        }

        if outcome.requires(LifecycleAction::RecordAudit) {
            let mut event = AuditEvent::new(
                caller.tenant_id.clone(),
                Some(quote.id.clone()),
                format!("quote.{}", outcome.event),
                AuditCategory::Lifecycle,
                caller.user_id.as_str(),
                AuditOutcome::Success,
                quote.updated_at,
            )
            .with_metadata("from", outcome.from)
            .with_metadata("to", outcome.to)
            .with_metadata("version", quote.version);
            for (key, value) in details {
                event = event.with_metadata(key, value);
            }
            self.record(event);
        }
    }
}

fn ensure_current_revision(quote: &Quote) -> Result<(), ApplicationError> {
    if !quote.is_active {
        return Err(DomainError::Validation(format!(
            "quote `{}` has been superseded by a newer revision",
            quote.id
        ))
        .into());
    }
    Ok(())
}

fn bundle_pricing_error(quote: &Quote) -> ApplicationError {
    DomainError::Validation(format!(
        "bundle `{}` takes its totals from its child quotes; edit the children instead",
        quote.id
    ))
    .into()
}
