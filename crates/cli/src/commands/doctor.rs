use anyhow::Context;
use serde::Serialize;
use slideboard_core::config::{AppConfig, LoadOptions};
use slideboard_db::migrations::{applied_count, MIGRATOR};
use slideboard_db::{connect_with_config, DbPool};

use crate::commands::{runtime, CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn exit_code(&self) -> u8 {
        let failed = |name: &str| {
            self.checks.iter().any(|check| check.name == name && check.status == CheckStatus::Fail)
        };
        if failed("config_validation") {
            EXIT_CONFIG
        } else if self.overall_status == CheckStatus::Fail {
            EXIT_DB_CONNECTIVITY
        } else {
            0
        }
    }
}

pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = report.exit_code();

    let output = if json_output {
        serde_json::to_string(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_policy_warnings(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["policy_warnings", "database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let any_warn = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (any_fail, any_warn) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready, with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_policy_warnings(config: &AppConfig) -> DoctorCheck {
    let warnings = config.warnings();
    if warnings.is_empty() {
        DoctorCheck {
            name: "policy_warnings",
            status: CheckStatus::Pass,
            details: format!("{} tenant overrides look consistent", config.tenants.len()),
        }
    } else {
        DoctorCheck {
            name: "policy_warnings",
            status: CheckStatus::Warn,
            details: warnings.join("; "),
        }
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime("doctor") {
        Ok(runtime) => runtime,
        Err(_) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: "failed to initialize async runtime".to_string(),
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database)
            .await
            .with_context(|| format!("failed to connect to `{}`", config.database.url))
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("{error:#}"),
                    },
                    DoctorCheck {
                        name: "schema_migrations",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database is unreachable".to_string(),
                    },
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let schema = check_schema(&pool).await;
        pool.close().await;
        vec![connectivity, schema]
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = MIGRATOR.iter().count();
    match applied_count(pool).await {
        Ok(applied) if applied >= known => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Pass,
            details: format!("{applied} of {known} migrations applied"),
        },
        Ok(applied) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Warn,
            details: format!("{applied} of {known} migrations applied; run `slideboard migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("could not read the migration ledger: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
