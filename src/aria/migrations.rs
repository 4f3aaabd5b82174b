//! Forward-only schema migration runner (spec §4.10 as expanded in SPEC_FULL
//! §4.10). Migrations are plain `.sql` files embedded at compile time via
//! `include_str!`; each is applied inside its own transaction, tracked in a
//! `schema_migrations` table scoped per logical schema (`aria_data`,
//! `aria_engine`). This is the in-process runner; authoring new migration
//! files is an external, interactive concern (spec §1).

use sqlx::PgPool;

use crate::aria::error::AriaResult;

pub struct Migration {
    pub schema: &'static str,
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Ordered ascending within each schema; schemas are independent of each other.
const MIGRATIONS: &[Migration] = &[
    Migration {
        schema: "aria_engine",
        version: 1,
        name: "init",
        sql: include_str!("../../migrations/aria_engine/0001_init.sql"),
    },
    Migration {
        schema: "aria_data",
        version: 1,
        name: "init",
        sql: include_str!("../../migrations/aria_data/0001_init.sql"),
    },
];

/// Applies every migration whose version exceeds the schema's tracked one.
/// Returns the number of migrations actually applied.
pub async fn run(pool: &PgPool) -> AriaResult<u32> {
    let mut applied = 0u32;
    for migration in MIGRATIONS {
        ensure_tracking_table(pool, migration.schema).await?;
        let current_version = current_version(pool, migration.schema).await?;

        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "applying migration {}.{:04}_{}",
            migration.schema,
            migration.version,
            migration.name
        );

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query(&format!(
            "INSERT INTO {}.schema_migrations (version, name) VALUES ($1, $2)",
            migration.schema
        ))
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        applied += 1;
    }
    Ok(applied)
}

/// Migration 0001 of each schema also creates this table, but `run()` needs it
/// to exist before that migration's own version check can run.
async fn ensure_tracking_table(pool: &PgPool, schema: &str) -> AriaResult<()> {
    sqlx::raw_sql(&format!(
        "CREATE SCHEMA IF NOT EXISTS {schema};
         CREATE TABLE IF NOT EXISTS {schema}.schema_migrations (
             version    BIGINT PRIMARY KEY,
             name       TEXT NOT NULL,
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
         );"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

async fn current_version(pool: &PgPool, schema: &str) -> AriaResult<i64> {
    let version: i64 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(MAX(version), 0) FROM {schema}.schema_migrations"
    ))
    .fetch_one(pool)
    .await?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_ascending_within_each_schema() {
        let mut seen: std::collections::HashMap<&str, i64> = std::collections::HashMap::new();
        for migration in MIGRATIONS {
            let last = seen.entry(migration.schema).or_insert(0);
            assert!(migration.version > *last, "migration versions must increase within a schema");
            *last = migration.version;
        }
    }

    #[test]
    fn every_migration_has_nonempty_sql() {
        for migration in MIGRATIONS {
            assert!(!migration.sql.trim().is_empty());
        }
    }
}
