use slideboard_core::config::LoadOptions;
use slideboard_db::{connect_with_config, migrations};

use crate::commands::{load_config, runtime, CommandResult, EXIT_DB_CONNECTIVITY, EXIT_MIGRATION};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        let applied = migrations::MIGRATOR.iter().count();
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(applied)
    });

    match result {
        Ok(known) => {
            tracing::info!(event_name = "db.migrations_applied", known_migrations = known);
            CommandResult::success("migrate", format!("schema up to date ({known} migrations)"))
        }
        Err((error_class, message, exit_code)) => {
            tracing::warn!(event_name = "db.migration_failed", error_class, error = %message);
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
