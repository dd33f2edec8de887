pub mod pg_version;
pub mod sql;

use indoc::formatdoc;
use pg_version::{check_postgres_version, fetch_and_check_postgres_version};
use sql::EXECUTION_QUEUE_MIGRATIONS;
use sqlx::{
    query, query_as, query_scalar, Acquire, FromRow, PgConnection, PgExecutor, Postgres,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Error occurred while parsing postgres version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("execution_queue requires PostgreSQL v12.0 or greater (detected `server_version_num` = {0})")]
    IncompatibleVersion(u32),
    #[error("Database is at execution_queue schema revision {latest_migration} which includes breaking migration {latest_breaking_migration}, but this build only knows revisions up to {highest_migration}. Refusing to continue.")]
    IncompatibleRevision {
        latest_migration: i32,
        latest_breaking_migration: i32,
        highest_migration: u32,
    },
    #[error("Error occurred while migrating: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Creates the schema and its `migrations` bookkeeping table.
async fn install_schema(conn: &mut PgConnection, escaped_schema: &str) -> Result<(), MigrateError> {
    let version = fetch_and_check_postgres_version(&mut *conn).await?;
    info!(pg_version = version, "Installing execution_queue schema");

    let create_schema_query = formatdoc!(
        r#"
            create schema if not exists {escaped_schema};
        "#
    );

    let create_migration_table_query = formatdoc!(
        r#"
            create table if not exists {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz default now() not null,
                breaking boolean not null default false
            );
        "#
    );

    query(&create_schema_query).execute(&mut *conn).await?;
    query(&create_migration_table_query)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[derive(FromRow)]
struct LastMigration {
    server_version_num: String,
    id: Option<i32>,
    biggest_breaking_id: Option<i32>,
}

impl LastMigration {
    fn is_before_number(&self, migration_number: u32) -> bool {
        match self.id.and_then(|id| u32::try_from(id).ok()) {
            Some(id) => migration_number > id,
            None => true,
        }
    }
}

/// Returns the last migration applied to the database, installing the
/// schema first when it does not exist yet.
async fn get_last_migration(
    conn: &mut PgConnection,
    escaped_schema: &str,
) -> Result<LastMigration, MigrateError> {
    let table_exists: bool = query_scalar("select to_regclass($1::text) is not null")
        .bind(format!("{escaped_schema}.migrations"))
        .fetch_one(&mut *conn)
        .await?;
    if !table_exists {
        install_schema(&mut *conn, escaped_schema).await?;
    }

    let migrations_status_query = formatdoc!(
        r#"
            select current_setting('server_version_num') as server_version_num,
            (select id from {escaped_schema}.migrations order by id desc limit 1) as id,
            (select id from {escaped_schema}.migrations where breaking is true order by id desc limit 1) as biggest_breaking_id;
        "#
    );

    query_as::<_, LastMigration>(&migrations_status_query)
        .fetch_one(&mut *conn)
        .await
        .map_err(MigrateError::from)
}

/// Key of the transaction-level advisory lock serializing migrations of one
/// schema across processes.
fn migration_lock_key(escaped_schema: &str) -> String {
    format!("execution_queue_migrate:{escaped_schema}")
}

/// Brings the schema up to the newest migration known to this build.
///
/// Everything runs in one transaction holding an advisory lock on the
/// schema, so workers booting together apply each migration once and a
/// failed migration leaves no partial state behind.
pub async fn migrate<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let mut tx = executor.begin().await?;
    query("select pg_advisory_xact_lock(hashtext($1))")
        .bind(migration_lock_key(escaped_schema))
        .execute(&mut *tx)
        .await?;

    let last_migration = get_last_migration(&mut tx, escaped_schema).await?;

    check_postgres_version(&last_migration.server_version_num)?;
    let latest_migration = last_migration.id;
    let latest_breaking_migration = last_migration.biggest_breaking_id;

    let mut highest_migration = 0;
    let mut migrated = false;
    for migration in EXECUTION_QUEUE_MIGRATIONS.iter() {
        let migration_number = migration.migration_number();
        highest_migration = highest_migration.max(migration_number);

        if !last_migration.is_before_number(migration_number) {
            continue;
        }

        migrated = true;
        info!(
            migration_number,
            migration_name = migration.name(),
            is_breaking_migration = migration.is_breaking(),
            "Running migration {}",
            migration.name(),
        );
        migration.execute(&mut tx, escaped_schema).await?;
        let sql = format!("insert into {escaped_schema}.migrations (id, breaking) values ($1, $2)");
        query(&sql)
            .bind(migration_number as i32)
            .bind(migration.is_breaking())
            .execute(&mut *tx)
            .await?;
    }

    if let Some(latest_breaking_migration) = latest_breaking_migration {
        if highest_migration < latest_breaking_migration as u32 {
            return Err(MigrateError::IncompatibleRevision {
                latest_migration: latest_migration.unwrap_or(0),
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    tx.commit().await?;

    if migrated {
        info!("Migrations complete");
    }

    if let Some(latest_migration) = latest_migration {
        if highest_migration < latest_migration as u32 {
            warn!(
                latest_migration,
                highest_migration,
                "Database is at execution_queue schema revision {}, but this build only knows revisions up to {}. Attempting to continue regardless.",
                latest_migration,
                highest_migration,
            );
        }
    }

    Ok(())
}
