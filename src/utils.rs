use sqlx::{query_scalar, PgExecutor};

use crate::errors::Result;

/// Quotes `identifier` the way PostgreSQL would (`format('%I', ...)`).
pub async fn escape_identifier<'e>(executor: impl PgExecutor<'e>, identifier: &str) -> Result<String> {
    let escaped_identifier: String = query_scalar("select format('%I', $1::text)")
        .bind(identifier)
        .fetch_one(executor)
        .await?;

    Ok(escaped_identifier)
}
