use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::policy::{
    ConfiguredPolicyResolver, LifecyclePolicy, PolicyResolver, PricingPolicy,
    PricingPolicyOverride, TenantPolicyOverride,
};
use crate::domain::customer::TenantId;
use crate::domain::quote::{MAX_VALID_DAYS, MIN_VALID_DAYS};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub pricing: PricingPolicy,
    pub lifecycle: LifecycleConfig,
    pub tenants: BTreeMap<String, TenantPolicyOverride>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub policy: LifecyclePolicy,
    /// Validity applied by create, template stamping and refresh when the caller names none.
    pub default_valid_days: u32,
    /// Attempts a bundle rollup makes before giving up on a contended bundle.
    pub bundle_recompute_retries: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_CONFIG_FILE: &str = "slideboard.toml";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://slideboard.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            pricing: PricingPolicy::default(),
            lifecycle: LifecycleConfig {
                policy: LifecyclePolicy::default(),
                default_valid_days: 30,
                bundle_recompute_retries: 3,
            },
            tenants: BTreeMap::new(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        for warning in config.warnings() {
            tracing::warn!(event_name = "config.policy_warning", warning = %warning);
        }

        Ok(config)
    }

    pub fn policy_resolver(&self) -> ConfiguredPolicyResolver {
        ConfiguredPolicyResolver::new(
            self.pricing.clone(),
            self.lifecycle.policy.clone(),
            self.tenants.clone(),
        )
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(pricing) = patch.pricing {
            self.pricing = self.pricing.merged(&pricing);
        }

        if let Some(lifecycle) = patch.lifecycle {
            if let Some(allow_review_edits) = lifecycle.allow_review_edits {
                self.lifecycle.policy.allow_review_edits = allow_review_edits;
            }
            if let Some(require_segregation_of_duties) = lifecycle.require_segregation_of_duties {
                self.lifecycle.policy.require_segregation_of_duties =
                    require_segregation_of_duties;
            }
            if let Some(auto_approve) = lifecycle.auto_approve_within_threshold {
                self.lifecycle.policy.auto_approve_within_threshold = auto_approve;
            }
            if let Some(include_inactive) = lifecycle.bundle_includes_inactive_children {
                self.lifecycle.policy.bundle_includes_inactive_children = include_inactive;
            }
            if let Some(default_valid_days) = lifecycle.default_valid_days {
                self.lifecycle.default_valid_days = default_valid_days;
            }
            if let Some(retries) = lifecycle.bundle_recompute_retries {
                self.lifecycle.bundle_recompute_retries = retries;
            }
        }

        if let Some(tenants) = patch.tenants {
            self.tenants.extend(tenants);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SLIDEBOARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SLIDEBOARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("SLIDEBOARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("SLIDEBOARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("SLIDEBOARD_LOGGING_LEVEL").or_else(|| read_env("SLIDEBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLIDEBOARD_LOGGING_FORMAT").or_else(|| read_env("SLIDEBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("SLIDEBOARD_PRICING_MIN_DISCOUNT_RATE") {
            self.pricing.min_discount_rate =
                parse_env("SLIDEBOARD_PRICING_MIN_DISCOUNT_RATE", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_PRICING_MIN_PROFIT_MARGIN") {
            self.pricing.min_profit_margin =
                parse_env("SLIDEBOARD_PRICING_MIN_PROFIT_MARGIN", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_PRICING_APPROVAL_THRESHOLD") {
            self.pricing.approval_threshold =
                parse_env("SLIDEBOARD_PRICING_APPROVAL_THRESHOLD", &value)?;
        }

        let policy = &mut self.lifecycle.policy;
        if let Some(value) = read_env("SLIDEBOARD_LIFECYCLE_ALLOW_REVIEW_EDITS") {
            policy.allow_review_edits =
                parse_env("SLIDEBOARD_LIFECYCLE_ALLOW_REVIEW_EDITS", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_LIFECYCLE_REQUIRE_SEGREGATION_OF_DUTIES") {
            policy.require_segregation_of_duties =
                parse_env("SLIDEBOARD_LIFECYCLE_REQUIRE_SEGREGATION_OF_DUTIES", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_LIFECYCLE_AUTO_APPROVE_WITHIN_THRESHOLD") {
            policy.auto_approve_within_threshold =
                parse_env("SLIDEBOARD_LIFECYCLE_AUTO_APPROVE_WITHIN_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_LIFECYCLE_BUNDLE_INCLUDES_INACTIVE_CHILDREN") {
            policy.bundle_includes_inactive_children =
                parse_env("SLIDEBOARD_LIFECYCLE_BUNDLE_INCLUDES_INACTIVE_CHILDREN", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_LIFECYCLE_DEFAULT_VALID_DAYS") {
            self.lifecycle.default_valid_days =
                parse_env("SLIDEBOARD_LIFECYCLE_DEFAULT_VALID_DAYS", &value)?;
        }
        if let Some(value) = read_env("SLIDEBOARD_LIFECYCLE_BUNDLE_RECOMPUTE_RETRIES") {
            self.lifecycle.bundle_recompute_retries =
                parse_env("SLIDEBOARD_LIFECYCLE_BUNDLE_RECOMPUTE_RETRIES", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_pricing("pricing", &self.pricing)?;
        validate_lifecycle(&self.lifecycle)?;

        let resolver = self.policy_resolver();
        for tenant in self.tenants.keys() {
            if tenant.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "tenants.<id> keys must not be blank".to_string(),
                ));
            }
            let policy = resolver.resolve_policy(&TenantId(tenant.clone()));
            validate_pricing(&format!("tenants.{tenant}.pricing"), &policy)?;
        }
        Ok(())
    }

    /// Legal but suspicious settings. Reported at load, never fatal.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pricing.threshold_below_floor() {
            warnings.push(format!(
                "pricing.approval_threshold {} is below pricing.min_discount_rate {}",
                self.pricing.approval_threshold, self.pricing.min_discount_rate
            ));
        }
        for (tenant, patch) in &self.tenants {
            let policy = self.pricing.merged(&patch.pricing);
            if policy.threshold_below_floor() {
                warnings.push(format!(
                    "tenants.{tenant}: approval_threshold {} is below min_discount_rate {}",
                    policy.approval_threshold, policy.min_discount_rate
                ));
            }
        }
        warnings
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_pricing(section: &str, pricing: &PricingPolicy) -> Result<(), ConfigError> {
    match pricing.range_errors().into_iter().next() {
        Some(problem) => Err(ConfigError::Validation(format!("{section}.{problem}"))),
        None => Ok(()),
    }
}

fn validate_lifecycle(lifecycle: &LifecycleConfig) -> Result<(), ConfigError> {
    if !(MIN_VALID_DAYS..=MAX_VALID_DAYS).contains(&lifecycle.default_valid_days) {
        return Err(ConfigError::Validation(format!(
            "lifecycle.default_valid_days must be in range {MIN_VALID_DAYS}..={MAX_VALID_DAYS}"
        )));
    }

    if lifecycle.bundle_recompute_retries == 0 || lifecycle.bundle_recompute_retries > 10 {
        return Err(ConfigError::Validation(
            "lifecycle.bundle_recompute_retries must be in range 1..=10".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    pricing: Option<PricingPolicyOverride>,
    lifecycle: Option<LifecyclePatch>,
    tenants: Option<BTreeMap<String, TenantPolicyOverride>>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LifecyclePatch {
    allow_review_edits: Option<bool>,
    require_segregation_of_duties: Option<bool>,
    auto_approve_within_threshold: Option<bool>,
    bundle_includes_inactive_children: Option<bool>,
    default_valid_days: Option<u32>,
    bundle_recompute_retries: Option<u32>,
}
