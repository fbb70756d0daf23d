use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Migrations recorded as applied. Zero on a database that was never migrated.
pub async fn applied_count(pool: &DbPool) -> Result<usize, sqlx::Error> {
    let ledger: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if ledger == 0 {
        return Ok(0);
    }

    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(usize::try_from(applied).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_count, run_pending, MIGRATOR};
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "quote",
        "quote_item",
        "quote_template",
        "idx_quote_tenant_status",
        "idx_quote_tenant_bundle",
        "idx_quote_tenant_valid_until",
        "idx_quote_root",
        "idx_quote_item_quote_id",
        "idx_quote_template_tenant_category",
    ];

    async fn object_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_every_managed_object() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            assert_eq!(object_count(&pool, name).await, 1, "missing schema object `{name}`");
        }
    }

    #[tokio::test]
    async fn running_twice_is_a_no_op() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");

        let applied = sqlx::query("SELECT COUNT(*) AS count FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .expect("read migration ledger")
            .get::<i64, _>("count");
        assert_eq!(applied, MIGRATOR.iter().count() as i64);
    }

    #[tokio::test]
    async fn applied_count_is_zero_before_the_first_run() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert_eq!(applied_count(&pool).await.expect("count"), 0);

        run_pending(&pool).await.expect("run migrations");
        assert_eq!(applied_count(&pool).await.expect("count"), MIGRATOR.iter().count());
    }
}
