use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::TenantId;
use crate::domain::product::{CatalogPrice, ProductId};
use crate::domain::quote::Quote;
use crate::store::StoreError;

/// Read-only view of current list prices. Catalog maintenance lives elsewhere.
#[async_trait]
pub trait PriceCatalog: Send + Sync {
    async fn current_price(
        &self,
        tenant: &TenantId,
        product_id: &ProductId,
    ) -> Result<Option<CatalogPrice>, StoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticPriceCatalog {
    prices: HashMap<(String, String), CatalogPrice>,
}

impl StaticPriceCatalog {
    pub fn with_price(mut self, tenant: &TenantId, price: CatalogPrice) -> Self {
        self.prices.insert((tenant.0.clone(), price.product_id.0.clone()), price);
        self
    }
}

#[async_trait]
impl PriceCatalog for StaticPriceCatalog {
    async fn current_price(
        &self,
        tenant: &TenantId,
        product_id: &ProductId,
    ) -> Result<Option<CatalogPrice>, StoreError> {
        Ok(self.prices.get(&(tenant.0.clone(), product_id.0.clone())).cloned())
    }
}

/// Before/after figures of a catalog re-price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRefresh {
    pub previous_total: Decimal,
    pub previous_final: Decimal,
    pub new_total: Decimal,
    pub new_final: Decimal,
    pub repriced_items: usize,
}

impl PriceRefresh {
    pub fn final_delta(&self) -> Decimal {
        self.new_final - self.previous_final
    }
}

/// Moves every catalog-linked line onto today's cost and price, then re-derives
/// the rollup. Lines without a product reference or without a catalog entry keep
/// their quoted figures.
pub async fn reprice_from_catalog(
    quote: &mut Quote,
    catalog: &dyn PriceCatalog,
) -> Result<PriceRefresh, StoreError> {
    let previous_total = quote.total_amount;
    let previous_final = quote.final_amount;
    let mut repriced_items = 0;

    for item in &mut quote.items {
        let Some(product_id) = item.product_id.as_ref() else {
            continue;
        };
        let Some(price) = catalog.current_price(&quote.tenant_id, product_id).await? else {
            continue;
        };
        if item.unit_cost != price.unit_cost || item.unit_price != price.unit_price {
            item.unit_cost = price.unit_cost;
            item.unit_price = price.unit_price;
            repriced_items += 1;
        }
    }
    quote.reprice();

    Ok(PriceRefresh {
        previous_total,
        previous_final,
        new_total: quote.total_amount,
        new_final: quote.final_amount,
        repriced_items,
    })
}
