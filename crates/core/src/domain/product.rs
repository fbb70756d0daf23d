use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

/// Current list figures for a product, as read from the tenant's price catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPrice {
    pub product_id: ProductId,
    pub unit_cost: Decimal,
    pub unit_price: Decimal,
}
