use std::sync::Arc;

use anyhow::Context;
use slideboard_core::config::{AppConfig, LoadOptions};
use slideboard_core::{Caller, EngineSettings, ExpirySweepReport, QuoteEngine};
use slideboard_db::{connect_with_config, SqlQuoteStore, SqlTemplateStore};

use crate::commands::{load_config, runtime, CommandResult, EXIT_DB_CONNECTIVITY, EXIT_OPERATION};

pub fn run(options: &LoadOptions, tenant: &str, actor: &str) -> CommandResult {
    if tenant.trim().is_empty() {
        let message = "--tenant must not be blank";
        return CommandResult::failure("expire", "invalid_argument", message, EXIT_OPERATION);
    }
    let config = match load_config("expire", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("expire") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let caller = Caller::new(tenant, actor);
    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;
        let swept = sweep(&config, pool.clone(), &caller).await;
        pool.close().await;
        swept.map_err(|error| ("operation", format!("{error:#}"), EXIT_OPERATION))
    });

    match result {
        Ok(report) => report_outcome(&report),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}

fn report_outcome(report: &ExpirySweepReport) -> CommandResult {
    let message = format!(
        "expired {} of {} lapsed quotes ({} conflicts, {} failed, {} bundles recomputed)",
        report.expired.len(),
        report.scanned,
        report.conflicts.len(),
        report.failed.len(),
        report.bundles_recomputed.len()
    );
    match serde_json::to_value(report) {
        Ok(data) => CommandResult::success_with("expire", message, Some(data)),
        Err(error) => CommandResult::failure(
            "expire",
            "serialization",
            format!("could not render sweep report: {error}"),
            EXIT_OPERATION,
        ),
    }
}

async fn sweep(
    config: &AppConfig,
    pool: slideboard_db::DbPool,
    caller: &Caller,
) -> anyhow::Result<ExpirySweepReport> {
    let engine = QuoteEngine::new(
        Arc::new(SqlQuoteStore::new(pool.clone())),
        Arc::new(SqlTemplateStore::new(pool)),
        Arc::new(config.policy_resolver()),
    )
    .with_settings(EngineSettings::from(&config.lifecycle));

    engine
        .batch_expire(caller)
        .await
        .with_context(|| format!("expiry sweep for tenant `{}` failed", caller.tenant_id))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value;
    use slideboard_core::{ExpirySweepReport, QuoteId, TenantId};

    use super::report_outcome;

    #[test]
    fn quotes_that_failed_to_lapse_are_listed() {
        let report = ExpirySweepReport {
            tenant_id: TenantId("tenant-east".to_owned()),
            scanned: 2,
            expired: vec![QuoteId("q-1".to_owned())],
            conflicts: Vec::new(),
            failed: vec![QuoteId("q-2".to_owned())],
            bundles_recomputed: Vec::new(),
            ran_at: Utc::now(),
        };

        let result = report_outcome(&report);
        assert_eq!(result.exit_code, 0);
        let payload: Value = serde_json::from_str(&result.output).expect("json output");
        assert_eq!(payload["data"]["failed"][0], "q-2");
        assert!(payload["message"].as_str().is_some_and(|message| message.contains("1 failed")));
    }
}
