use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use slideboard_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

struct Sources {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let path = detect_config_path(options.config_path.as_deref());
    let sources = Sources { doc: load_config_file_doc(path.as_deref()), path };
    let entries = entries(&config, &sources);
    let mut tenants: Vec<&str> = config.tenants.keys().map(String::as_str).collect();
    tenants.sort_unstable();

    let message =
        format!("{} effective settings, {} tenant overrides", entries.len(), tenants.len());
    let data = serde_json::json!({
        "precedence": "override > env > file > default",
        "config_file": sources.path.as_ref().map(|path| path.display().to_string()),
        "entries": entries,
        "tenant_overrides": tenants,
        "warnings": config.warnings(),
    });
    CommandResult::success_with("config", message, Some(data))
}

fn entries(config: &AppConfig, sources: &Sources) -> Vec<ConfigEntry> {
    let pricing = &config.pricing;
    let lifecycle = &config.lifecycle;
    let values: [(&'static str, &[&str], String); 14] = [
        ("database.url", &["SLIDEBOARD_DATABASE_URL"], config.database.url.clone()),
        (
            "database.max_connections",
            &["SLIDEBOARD_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            &["SLIDEBOARD_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        (
            "logging.level",
            &["SLIDEBOARD_LOGGING_LEVEL", "SLIDEBOARD_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        (
            "logging.format",
            &["SLIDEBOARD_LOGGING_FORMAT", "SLIDEBOARD_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
        (
            "pricing.min_discount_rate",
            &["SLIDEBOARD_PRICING_MIN_DISCOUNT_RATE"],
            pricing.min_discount_rate.to_string(),
        ),
        (
            "pricing.min_profit_margin",
            &["SLIDEBOARD_PRICING_MIN_PROFIT_MARGIN"],
            pricing.min_profit_margin.to_string(),
        ),
        (
            "pricing.approval_threshold",
            &["SLIDEBOARD_PRICING_APPROVAL_THRESHOLD"],
            pricing.approval_threshold.to_string(),
        ),
        (
            "lifecycle.allow_review_edits",
            &["SLIDEBOARD_LIFECYCLE_ALLOW_REVIEW_EDITS"],
            lifecycle.policy.allow_review_edits.to_string(),
        ),
        (
            "lifecycle.require_segregation_of_duties",
            &["SLIDEBOARD_LIFECYCLE_REQUIRE_SEGREGATION_OF_DUTIES"],
            lifecycle.policy.require_segregation_of_duties.to_string(),
        ),
        (
            "lifecycle.auto_approve_within_threshold",
            &["SLIDEBOARD_LIFECYCLE_AUTO_APPROVE_WITHIN_THRESHOLD"],
            lifecycle.policy.auto_approve_within_threshold.to_string(),
        ),
        (
            "lifecycle.bundle_includes_inactive_children",
            &["SLIDEBOARD_LIFECYCLE_BUNDLE_INCLUDES_INACTIVE_CHILDREN"],
            lifecycle.policy.bundle_includes_inactive_children.to_string(),
        ),
        (
            "lifecycle.default_valid_days",
            &["SLIDEBOARD_LIFECYCLE_DEFAULT_VALID_DAYS"],
            lifecycle.default_valid_days.to_string(),
        ),
        (
            "lifecycle.bundle_recompute_retries",
            &["SLIDEBOARD_LIFECYCLE_BUNDLE_RECOMPUTE_RETRIES"],
            lifecycle.bundle_recompute_retries.to_string(),
        ),
    ];

    values
        .into_iter()
        .map(|(key, env_keys, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, env_keys, sources),
        })
        .collect()
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], sources: &Sources) -> String {
    if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = &sources.doc {
        if contains_path(doc, key_path) {
            let file_path = sources
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
