use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::TenantId;
use crate::domain::quote::{QuoteId, QuoteItem, QuoteItemInput};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Frozen copy of a quote's lines and pricing that new quotes can be stamped from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTemplate {
    pub id: TemplateId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub source_quote_id: Option<QuoteId>,
    pub discount_rate: Decimal,
    pub items: Vec<QuoteItemInput>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CATEGORY_CURTAIN: &str = "CURTAIN";
pub const CATEGORY_WALLPAPER: &str = "WALLPAPER";
pub const CATEGORY_MIXED: &str = "MIXED";

/// Single-family templates are filed under that family; anything else is mixed.
pub fn infer_category(items: &[QuoteItem]) -> String {
    let categories: BTreeSet<&str> =
        items.iter().filter_map(|item| item.category.as_deref()).collect();

    let mut iter = categories.iter();
    match (iter.next(), iter.next()) {
        (Some(only), None) if only.contains("CURTAIN") || only.contains("TRACK") => {
            CATEGORY_CURTAIN.to_owned()
        }
        (Some(only), None) if only.contains("WALLPAPER") || only.contains("WALLCLOTH") => {
            CATEGORY_WALLPAPER.to_owned()
        }
        _ => CATEGORY_MIXED.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::infer_category;
    use crate::domain::quote::QuoteItemInput;

    fn line(category: &str) -> crate::domain::quote::QuoteItem {
        QuoteItemInput {
            product_id: None,
            product_name: category.to_lowercase(),
            category: Some(category.to_owned()),
            quantity: Decimal::ONE,
            unit_cost: Decimal::ONE,
            unit_price: Decimal::TWO,
        }
        .into_item()
        .expect("valid item")
    }

    #[test]
    fn infers_single_family_categories() {
        assert_eq!(infer_category(&[line("CURTAIN"), line("CURTAIN")]), "CURTAIN");
        assert_eq!(infer_category(&[line("CURTAIN_TRACK")]), "CURTAIN");
        assert_eq!(infer_category(&[line("WALLCLOTH")]), "WALLPAPER");
    }

    #[test]
    fn mixed_or_empty_lines_are_mixed() {
        assert_eq!(infer_category(&[]), "MIXED");
        assert_eq!(infer_category(&[line("CURTAIN"), line("WALLPAPER")]), "MIXED");
    }
}
