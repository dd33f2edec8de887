use sqlx::{Postgres, Transaction};

mod m000001;
mod m000002;
mod m000003;

/// Placeholder replaced by the escaped schema name in every statement.
pub const SCHEMA_PLACEHOLDER: &str = ":EXECUTION_QUEUE_SCHEMA";

pub struct ExecutionQueueMigration {
    name: &'static str,
    migration_number: u32,
    is_breaking: bool,
    stmts: &'static [&'static str],
}

impl ExecutionQueueMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn migration_number(&self) -> u32 {
        self.migration_number
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            let stmt = stmt.replace(SCHEMA_PLACEHOLDER, escaped_schema);
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const EXECUTION_QUEUE_MIGRATIONS: &[ExecutionQueueMigration] =
    &[
    m000001::M000001_MIGRATION,
    m000002::M000002_MIGRATION,
    m000003::M000003_MIGRATION,
];
