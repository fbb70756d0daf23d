use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::{CustomerId, TenantId};
use crate::domain::product::ProductId;
use crate::errors::DomainError;
use crate::money::{line_amount, round_currency};

pub const MIN_VALID_DAYS: u32 = 1;
pub const MAX_VALID_DAYS: u32 = 90;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteItemId(pub String);

impl QuoteItemId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Expired,
    Converted,
}

impl QuoteStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::Converted => "CONVERTED",
        }
    }

    /// Statuses that no longer age out. Everything else lapses once its deadline passes.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Converted)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DRAFT" => Ok(Self::Draft),
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" => Ok(Self::Expired),
            "CONVERTED" => Ok(Self::Converted),
            other => Err(DomainError::Validation(format!("unknown quote status `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteKind {
    Standard,
    Bundle,
}

impl QuoteKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::Bundle => "BUNDLE",
        }
    }
}

impl FromStr for QuoteKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "STANDARD" => Ok(Self::Standard),
            "BUNDLE" => Ok(Self::Bundle),
            other => Err(DomainError::Validation(format!("unknown quote kind `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub id: QuoteItemId,
    pub product_id: Option<ProductId>,
    pub product_name: String,
    pub category: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub unit_price: Decimal,
    /// Exact `quantity × unit_price`; never rounded on its own.
    pub subtotal: Decimal,
}

impl QuoteItem {
    pub fn derived_subtotal(&self) -> Decimal {
        line_amount(self.quantity, self.unit_price)
    }

    pub fn cost_total(&self) -> Decimal {
        line_amount(self.quantity, self.unit_cost)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity < Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "item `{}` has negative quantity {}",
                self.product_name, self.quantity
            )));
        }
        if self.unit_cost < Decimal::ZERO || self.unit_price < Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "item `{}` has a negative unit cost or price",
                self.product_name
            )));
        }
        Ok(())
    }
}

/// Caller-supplied line before it is assigned an id and a derived subtotal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteItemInput {
    pub product_id: Option<ProductId>,
    pub product_name: String,
    pub category: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub unit_price: Decimal,
}

impl QuoteItemInput {
    pub fn into_item(self) -> Result<QuoteItem, DomainError> {
        let mut item = QuoteItem {
            id: QuoteItemId::generate(),
            product_id: self.product_id,
            product_name: self.product_name,
            category: self.category,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            unit_price: self.unit_price,
            subtotal: Decimal::ZERO,
        };
        item.validate()?;
        item.subtotal = item.derived_subtotal();
        Ok(item)
    }
}

/// In-place change to one line. `None` leaves a field as stored; the line id
/// never changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteItemPatch {
    pub product_name: Option<String>,
    pub category: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub unit_price: Option<Decimal>,
}

impl QuoteItemPatch {
    pub fn apply(self, item: &mut QuoteItem) -> Result<(), DomainError> {
        let mut patched = item.clone();
        if let Some(product_name) = self.product_name {
            patched.product_name = product_name;
        }
        if let Some(category) = self.category {
            patched.category = Some(category);
        }
        if let Some(quantity) = self.quantity {
            patched.quantity = quantity;
        }
        if let Some(unit_cost) = self.unit_cost {
            patched.unit_cost = unit_cost;
        }
        if let Some(unit_price) = self.unit_price {
            patched.unit_price = unit_price;
        }
        patched.validate()?;
        patched.subtotal = patched.derived_subtotal();
        *item = patched;
        Ok(())
    }
}

impl From<&QuoteItem> for QuoteItemInput {
    fn from(item: &QuoteItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            category: item.category.clone(),
            quantity: item.quantity,
            unit_cost: item.unit_cost,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub quote_no: String,
    pub tenant_id: TenantId,
    pub customer_id: Option<CustomerId>,
    pub title: Option<String>,
    pub kind: QuoteKind,
    pub bundle_id: Option<QuoteId>,
    pub root_quote_id: QuoteId,
    pub revision: u32,
    pub is_active: bool,
    pub items: Vec<QuoteItem>,
    pub total_amount: Decimal,
    pub discount_rate: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub status: QuoteStatus,
    pub valid_until: Option<DateTime<Utc>>,
    pub version: u32,
    pub submitted_by: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub reject_reason: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    /// Fresh standalone draft: version 0, no discount, root reference pointing at itself.
    pub fn new_draft(
        tenant_id: TenantId,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = QuoteId::generate();
        Self {
            root_quote_id: id.clone(),
            quote_no: generate_quote_no(now),
            id,
            tenant_id,
            customer_id: None,
            title: None,
            kind: QuoteKind::Standard,
            bundle_id: None,
            revision: 1,
            is_active: true,
            items: Vec::new(),
            total_amount: round_currency(Decimal::ZERO),
            discount_rate: Decimal::ONE,
            discount_amount: round_currency(Decimal::ZERO),
            final_amount: round_currency(Decimal::ZERO),
            status: QuoteStatus::Draft,
            valid_until: None,
            version: 0,
            submitted_by: None,
            submitted_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            reject_reason: None,
            locked_at: None,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_bundle(&self) -> bool {
        self.kind == QuoteKind::Bundle
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    pub fn is_logically_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.valid_until.is_some_and(|deadline| deadline < now)
    }

    /// Status as callers should see it: a lapsed deadline reads as expired before
    /// the sweep has stamped it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> QuoteStatus {
        if self.is_logically_expired(now) {
            QuoteStatus::Expired
        } else {
            self.status
        }
    }

    pub fn total_cost(&self) -> Decimal {
        self.items.iter().map(QuoteItem::cost_total).sum()
    }

    pub fn set_discount_rate(&mut self, rate: Decimal) -> Result<(), DomainError> {
        validate_discount_rate(rate)?;
        self.discount_rate = rate;
        Ok(())
    }

    pub fn set_validity(&mut self, now: DateTime<Utc>, valid_days: u32) -> Result<(), DomainError> {
        validate_valid_days(valid_days)?;
        self.valid_until = Some(now + Duration::days(i64::from(valid_days)));
        Ok(())
    }

    /// Re-derives every line subtotal and the rollup from quantities, prices and the rate.
    pub fn reprice(&mut self) {
        for item in &mut self.items {
            item.subtotal = item.derived_subtotal();
        }
        let total = round_currency(self.items.iter().map(|item| item.subtotal).sum());
        let final_amount = round_currency(total * self.discount_rate);
        self.total_amount = total;
        self.final_amount = final_amount;
        self.discount_amount = round_currency(total - final_amount);
    }

    pub fn check_pricing_invariants(&self) -> Result<(), DomainError> {
        for item in &self.items {
            item.validate()?;
            if item.subtotal != item.derived_subtotal() {
                return Err(DomainError::InvariantViolation(format!(
                    "item `{}` subtotal {} drifted from quantity × unit price {}",
                    item.id.0,
                    item.subtotal,
                    item.derived_subtotal()
                )));
            }
        }

        if self.total_amount < Decimal::ZERO || self.final_amount < Decimal::ZERO {
            return Err(DomainError::InvariantViolation(format!(
                "quote `{}` carries a negative amount",
                self.id
            )));
        }

        let expected_final = round_currency(self.total_amount * self.discount_rate);
        if self.final_amount != expected_final {
            return Err(DomainError::InvariantViolation(format!(
                "final amount {} does not equal total {} × rate {}",
                self.final_amount, self.total_amount, self.discount_rate
            )));
        }
        if self.total_amount - self.discount_amount != self.final_amount {
            return Err(DomainError::InvariantViolation(format!(
                "total {} − discount {} does not reconcile with final {}",
                self.total_amount, self.discount_amount, self.final_amount
            )));
        }
        Ok(())
    }

    pub fn clear_review_metadata(&mut self) {
        self.submitted_by = None;
        self.submitted_at = None;
        self.approved_by = None;
        self.approved_at = None;
        self.rejected_by = None;
        self.reject_reason = None;
    }
}

pub fn validate_discount_rate(rate: Decimal) -> Result<(), DomainError> {
    if rate <= Decimal::ZERO || rate > Decimal::ONE {
        return Err(DomainError::Validation(format!(
            "discount rate {rate} must be greater than 0 and at most 1"
        )));
    }
    Ok(())
}

pub fn validate_valid_days(valid_days: u32) -> Result<(), DomainError> {
    if !(MIN_VALID_DAYS..=MAX_VALID_DAYS).contains(&valid_days) {
        return Err(DomainError::Validation(format!(
            "validity of {valid_days} days is outside {MIN_VALID_DAYS}..={MAX_VALID_DAYS}"
        )));
    }
    Ok(())
}

fn generate_quote_no(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("QT{}-{}", now.format("%Y%m%d"), &suffix[..6])
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{Quote, QuoteItemInput, QuoteItemPatch, QuoteStatus};
    use crate::domain::customer::TenantId;
    use crate::errors::DomainError;

    fn item(quantity: i64, cost: i64, price: i64) -> QuoteItemInput {
        QuoteItemInput {
            product_id: None,
            product_name: "blackout curtain".to_owned(),
            category: Some("CURTAIN".to_owned()),
            quantity: Decimal::from(quantity),
            unit_cost: Decimal::from(cost),
            unit_price: Decimal::from(price),
        }
    }

    fn draft() -> Quote {
        Quote::new_draft(TenantId("t-1".to_owned()), "sales-1", Utc::now())
    }

    #[test]
    fn new_draft_points_root_at_itself() {
        let quote = draft();
        assert_eq!(quote.root_quote_id, quote.id);
        assert_eq!(quote.version, 0);
        assert_eq!(quote.status, QuoteStatus::Draft);
        assert!(quote.quote_no.starts_with("QT"));
    }

    #[test]
    fn line_patch_keeps_the_id_and_rejects_bad_figures_whole() {
        let mut line = item(2, 100, 200).into_item().expect("valid item");
        let id = line.id.clone();

        QuoteItemPatch { quantity: Some(Decimal::new(35, 1)), ..Default::default() }
            .apply(&mut line)
            .expect("patch");
        assert_eq!(line.id, id);
        assert_eq!(line.subtotal, Decimal::from(700));

        let rejected = QuoteItemPatch {
            unit_price: Some(Decimal::from(150)),
            quantity: Some(Decimal::from(-1)),
            ..Default::default()
        }
        .apply(&mut line);
        assert!(matches!(rejected, Err(DomainError::Validation(_))));
        assert_eq!(line.unit_price, Decimal::from(200));
        assert_eq!(line.subtotal, Decimal::from(700));
    }

    #[test]
    fn reprice_keeps_final_equal_to_rounded_total_times_rate() {
        let mut quote = draft();
        quote.items = vec![
            item(2, 100, 200).into_item().expect("valid item"),
            QuoteItemInput {
                quantity: Decimal::new(235, 2),
                unit_price: Decimal::new(1285, 1),
                ..item(1, 60, 0)
            }
            .into_item()
            .expect("valid item"),
        ];
        quote.set_discount_rate(Decimal::new(88, 2)).expect("valid rate");
        quote.reprice();

        assert_eq!(quote.items[1].subtotal, Decimal::new(301_975, 3));
        // 400 + 2.35 × 128.5 = 701.975 -> 701.98; × 0.88 = 617.7424 -> 617.74
        assert_eq!(quote.total_amount, Decimal::new(70_198, 2));
        assert_eq!(quote.final_amount, Decimal::new(61_774, 2));
        assert_eq!(quote.discount_amount, Decimal::new(8_424, 2));
        quote.check_pricing_invariants().expect("invariants hold after reprice");
    }

    #[test]
    fn drifted_subtotal_is_an_invariant_violation() {
        let mut quote = draft();
        quote.items = vec![item(2, 100, 200).into_item().expect("valid item")];
        quote.reprice();
        quote.items[0].subtotal = Decimal::from(399);

        assert!(matches!(
            quote.check_pricing_invariants(),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn rejects_negative_quantity_and_out_of_range_inputs() {
        assert!(matches!(item(-1, 10, 20).into_item(), Err(DomainError::Validation(_))));
        assert!(item(0, 10, 20).into_item().is_ok());

        let mut quote = draft();
        assert!(quote.set_discount_rate(Decimal::ZERO).is_err());
        assert!(quote.set_discount_rate(Decimal::new(101, 2)).is_err());
        assert!(quote.set_discount_rate(Decimal::ONE).is_ok());
        assert!(quote.set_validity(Utc::now(), 0).is_err());
        assert!(quote.set_validity(Utc::now(), 91).is_err());
        assert!(quote.set_validity(Utc::now(), 90).is_ok());
    }

    #[test]
    fn lapsed_deadline_reads_as_expired_until_terminal() {
        let now = Utc::now();
        let mut quote = draft();
        quote.valid_until = Some(now - Duration::minutes(1));
        assert_eq!(quote.status, QuoteStatus::Draft);
        assert_eq!(quote.effective_status(now), QuoteStatus::Expired);

        quote.status = QuoteStatus::Converted;
        assert_eq!(quote.effective_status(now), QuoteStatus::Converted);

        quote.status = QuoteStatus::Approved;
        quote.valid_until = Some(now + Duration::days(1));
        assert_eq!(quote.effective_status(now), QuoteStatus::Approved);
    }

    #[test]
    fn status_strings_parse_back() {
        let parsed: QuoteStatus = "PENDING_APPROVAL".parse().expect("known status");
        assert_eq!(parsed, QuoteStatus::PendingApproval);
        assert_eq!(parsed.to_string(), "PENDING_APPROVAL");
        assert!("pending".parse::<QuoteStatus>().is_err());
    }
}
