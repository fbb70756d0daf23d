pub mod policy;
pub mod pricing;
pub mod risk;

pub use policy::{
    ConfiguredPolicyResolver, LifecyclePolicy, LifecyclePolicyOverride, PolicyResolver,
    PricingPolicy, PricingPolicyOverride, TenantPolicyOverride,
};
pub use pricing::{reprice_from_catalog, PriceCatalog, PriceRefresh, StaticPriceCatalog};
pub use risk::{evaluate, evaluate_quote, RiskCheckResult, RiskFinding};
