use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::TenantId;

/// Pricing limits a quote is checked against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Lowest acceptable `final / original` ratio.
    pub min_discount_rate: Decimal,
    /// Lowest acceptable `(final - cost) / final` ratio.
    pub min_profit_margin: Decimal,
    /// Discount rates strictly below this need a reviewer.
    pub approval_threshold: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            min_discount_rate: Decimal::new(90, 2),
            min_profit_margin: Decimal::new(15, 2),
            approval_threshold: Decimal::new(90, 2),
        }
    }
}

impl PricingPolicy {
    pub fn requires_approval(&self, discount_rate: Decimal) -> bool {
        discount_rate < self.approval_threshold
    }

    pub fn merged(&self, patch: &PricingPolicyOverride) -> Self {
        Self {
            min_discount_rate: patch.min_discount_rate.unwrap_or(self.min_discount_rate),
            min_profit_margin: patch.min_profit_margin.unwrap_or(self.min_profit_margin),
            approval_threshold: patch.approval_threshold.unwrap_or(self.approval_threshold),
        }
    }

    /// Range problems, one message per offending field.
    pub fn range_errors(&self) -> Vec<String> {
        [
            ("min_discount_rate", self.min_discount_rate),
            ("min_profit_margin", self.min_profit_margin),
            ("approval_threshold", self.approval_threshold),
        ]
        .into_iter()
        .filter(|(_, value)| *value < Decimal::ZERO || *value > Decimal::ONE)
        .map(|(field, value)| format!("{field} must be within [0, 1], got {value}"))
        .collect()
    }

    /// A threshold under the floor means some floor-breaching rates skip review.
    pub fn threshold_below_floor(&self) -> bool {
        self.approval_threshold < self.min_discount_rate
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub allow_review_edits: bool,
    pub require_segregation_of_duties: bool,
    pub auto_approve_within_threshold: bool,
    pub bundle_includes_inactive_children: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            allow_review_edits: false,
            require_segregation_of_duties: true,
            auto_approve_within_threshold: false,
            bundle_includes_inactive_children: false,
        }
    }
}

impl LifecyclePolicy {
    pub fn merged(&self, patch: &LifecyclePolicyOverride) -> Self {
        Self {
            allow_review_edits: patch.allow_review_edits.unwrap_or(self.allow_review_edits),
            require_segregation_of_duties: patch
                .require_segregation_of_duties
                .unwrap_or(self.require_segregation_of_duties),
            auto_approve_within_threshold: patch
                .auto_approve_within_threshold
                .unwrap_or(self.auto_approve_within_threshold),
            bundle_includes_inactive_children: patch
                .bundle_includes_inactive_children
                .unwrap_or(self.bundle_includes_inactive_children),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingPolicyOverride {
    pub min_discount_rate: Option<Decimal>,
    pub min_profit_margin: Option<Decimal>,
    pub approval_threshold: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecyclePolicyOverride {
    pub allow_review_edits: Option<bool>,
    pub require_segregation_of_duties: Option<bool>,
    pub auto_approve_within_threshold: Option<bool>,
    pub bundle_includes_inactive_children: Option<bool>,
}

/// `[tenants.<id>]` block: fields left out fall back to the system defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenantPolicyOverride {
    pub pricing: PricingPolicyOverride,
    pub lifecycle: LifecyclePolicyOverride,
}

pub trait PolicyResolver: Send + Sync {
    fn resolve_policy(&self, tenant: &TenantId) -> PricingPolicy;
    fn resolve_lifecycle(&self, tenant: &TenantId) -> LifecyclePolicy;
}

#[derive(Clone, Debug, Default)]
pub struct ConfiguredPolicyResolver {
    pricing: PricingPolicy,
    lifecycle: LifecyclePolicy,
    tenants: BTreeMap<String, TenantPolicyOverride>,
}

impl ConfiguredPolicyResolver {
    pub fn new(
        pricing: PricingPolicy,
        lifecycle: LifecyclePolicy,
        tenants: BTreeMap<String, TenantPolicyOverride>,
    ) -> Self {
        Self { pricing, lifecycle, tenants }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>, patch: TenantPolicyOverride) -> Self {
        self.tenants.insert(tenant.into(), patch);
        self
    }
}

impl PolicyResolver for ConfiguredPolicyResolver {
    fn resolve_policy(&self, tenant: &TenantId) -> PricingPolicy {
        match self.tenants.get(&tenant.0) {
            Some(patch) => self.pricing.merged(&patch.pricing),
            None => self.pricing.clone(),
        }
    }

    fn resolve_lifecycle(&self, tenant: &TenantId) -> LifecyclePolicy {
        match self.tenants.get(&tenant.0) {
            Some(patch) => self.lifecycle.merged(&patch.lifecycle),
            None => self.lifecycle.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        ConfiguredPolicyResolver, LifecyclePolicyOverride, PolicyResolver, PricingPolicy,
        PricingPolicyOverride, TenantPolicyOverride,
    };
    use crate::domain::customer::TenantId;

    fn tenant(id: &str) -> TenantId {
        TenantId(id.to_owned())
    }

    #[test]
    fn unknown_tenant_resolves_to_system_defaults() {
        let resolver = ConfiguredPolicyResolver::default();
        let policy = resolver.resolve_policy(&tenant("nobody"));

        assert_eq!(policy, PricingPolicy::default());
        assert_eq!(policy.min_discount_rate, Decimal::new(90, 2));
        assert_eq!(policy.min_profit_margin, Decimal::new(15, 2));
        assert!(resolver.resolve_lifecycle(&tenant("nobody")).require_segregation_of_duties);
    }

    #[test]
    fn tenant_override_replaces_only_the_fields_it_sets() {
        let resolver = ConfiguredPolicyResolver::default().with_tenant(
            "acme",
            TenantPolicyOverride {
                pricing: PricingPolicyOverride {
                    min_discount_rate: Some(Decimal::new(80, 2)),
                    ..PricingPolicyOverride::default()
                },
                lifecycle: LifecyclePolicyOverride {
                    allow_review_edits: Some(true),
                    ..LifecyclePolicyOverride::default()
                },
            },
        );

        let policy = resolver.resolve_policy(&tenant("acme"));
        assert_eq!(policy.min_discount_rate, Decimal::new(80, 2));
        assert_eq!(policy.approval_threshold, Decimal::new(90, 2));

        let lifecycle = resolver.resolve_lifecycle(&tenant("acme"));
        assert!(lifecycle.allow_review_edits);
        assert!(lifecycle.require_segregation_of_duties);

        assert_eq!(resolver.resolve_policy(&tenant("other")), PricingPolicy::default());
    }

    #[test]
    fn approval_is_required_strictly_below_threshold() {
        let policy = PricingPolicy::default();
        assert!(policy.requires_approval(Decimal::new(85, 2)));
        assert!(!policy.requires_approval(Decimal::new(90, 2)));
        assert!(!policy.requires_approval(Decimal::ONE));
    }

    #[test]
    fn flags_out_of_range_fields_and_inverted_threshold() {
        let policy = PricingPolicy {
            min_discount_rate: Decimal::new(95, 2),
            min_profit_margin: Decimal::new(-1, 2),
            approval_threshold: Decimal::new(90, 2),
        };
        let errors = policy.range_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("min_profit_margin"));
        assert!(policy.threshold_below_floor());
        assert!(!PricingPolicy::default().threshold_below_floor());
    }
}
