use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// Records that `worker_id` is alive, creating its row on first contact.
#[tracing::instrument(skip_all, err, level = "trace", fields(otel.kind="client", db.system="postgresql", worker_id = %worker_id))]
pub async fn touch_worker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker_id: &str,
    lane: Option<&str>,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.worker_heartbeats (worker_id, lane)
                values ($1::text, $2::text)
                on conflict (worker_id) do update
                    set last_seen_at = now(), lane = excluded.lane
        "#
    );

    query(&sql)
        .bind(worker_id)
        .bind(lane)
        .execute(executor)
        .await?;

    Ok(())
}

/// Starts a fresh heartbeat row for a worker that is booting.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", worker_id = %worker_id))]
pub async fn register_worker<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker_id: &str,
    lane: Option<&str>,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.worker_heartbeats (worker_id, lane)
                values ($1::text, $2::text)
                on conflict (worker_id) do update
                    set started_at = now(), last_seen_at = now(), lane = excluded.lane
        "#
    );

    query(&sql)
        .bind(worker_id)
        .bind(lane)
        .execute(executor)
        .await?;

    Ok(())
}
