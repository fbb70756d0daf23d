use serde::Serialize;
use slideboard_core::config::{AppConfig, LoadOptions};
use slideboard_core::money::{as_fold, as_percent};
use slideboard_core::{LifecyclePolicy, PolicyResolver, PricingPolicy, TenantId};

use crate::commands::{load_config, CommandResult, EXIT_OPERATION};

#[derive(Debug, Serialize)]
struct PolicyReport {
    tenant_id: String,
    /// `false` when the tenant runs on the system defaults.
    tenant_override: bool,
    pricing: PricingPolicy,
    lifecycle: LifecyclePolicy,
    warnings: Vec<String>,
}

pub fn run(options: &LoadOptions, tenant: &str) -> CommandResult {
    if tenant.trim().is_empty() {
        let message = "--tenant must not be blank";
        return CommandResult::failure("policy", "invalid_argument", message, EXIT_OPERATION);
    }
    let config = match load_config("policy", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let report = resolve(&config, tenant);
    let message = format!(
        "tenant `{}`: floor {}折 ({}%), review below {}折, min margin {}%",
        report.tenant_id,
        as_fold(report.pricing.min_discount_rate),
        as_percent(report.pricing.min_discount_rate),
        as_fold(report.pricing.approval_threshold),
        as_percent(report.pricing.min_profit_margin),
    );
    match serde_json::to_value(&report) {
        Ok(data) => CommandResult::success_with("policy", message, Some(data)),
        Err(error) => CommandResult::failure(
            "policy",
            "serialization",
            format!("could not render policy: {error}"),
            EXIT_OPERATION,
        ),
    }
}

fn resolve(config: &AppConfig, tenant: &str) -> PolicyReport {
    let resolver = config.policy_resolver();
    let tenant_id = TenantId(tenant.to_owned());
    let pricing = resolver.resolve_policy(&tenant_id);

    let mut warnings = Vec::new();
    if pricing.threshold_below_floor() {
        warnings.push(format!(
            "approval_threshold {} is below min_discount_rate {}: some floor breaches skip review",
            pricing.approval_threshold, pricing.min_discount_rate
        ));
    }

    PolicyReport {
        tenant_id: tenant.to_owned(),
        tenant_override: config.tenants.contains_key(tenant),
        lifecycle: resolver.resolve_lifecycle(&tenant_id),
        pricing,
        warnings,
    }
}
