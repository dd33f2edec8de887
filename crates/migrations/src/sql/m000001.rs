use super::ExecutionQueueMigration;

pub const M000001_MIGRATION: ExecutionQueueMigration = ExecutionQueueMigration {
    name: "m000001",
    migration_number: 1,
    is_breaking: false,
    stmts: &[
        r#"
            create table :EXECUTION_QUEUE_SCHEMA.jobs (
                id bigserial primary key,
                owner_id text not null check (length(owner_id) > 0),
                kind text not null check (length(kind) > 0),
                payload jsonb not null default '{}'::jsonb,
                status text not null default 'queued' check (
                    status in ('queued', 'claimed', 'running', 'succeeded', 'failed', 'dead_letter', 'canceled')
                ),
                priority int not null default 0,
                lane text not null default 'default',
                run_at timestamptz not null default now(),
                next_retry_at timestamptz,
                dedupe_key text check (dedupe_key is null or length(dedupe_key) > 0),
                attempts int not null default 0 check (attempts >= 0),
                max_attempts int not null default 25 check (max_attempts >= 1),
                claimed_by text,
                claimed_at timestamptz,
                heartbeat_at timestamptz,
                last_error text,
                last_result jsonb,
                created_at timestamptz not null default now(),
                updated_at timestamptz not null default now(),
                started_at timestamptz,
                finished_at timestamptz,
                cancel_reason text,
                constraint jobs_attempts_within_limit check (attempts <= max_attempts),
                constraint jobs_lease_has_holder check (
                    status not in ('claimed', 'running') or (claimed_by is not null and heartbeat_at is not null)
                )
            );
        "#,
        r#"
            create index jobs_claim_idx
                on :EXECUTION_QUEUE_SCHEMA.jobs (lane, priority desc, run_at, created_at, id)
                where status = 'queued';
        "#,
        r#"
            create index jobs_lease_idx
                on :EXECUTION_QUEUE_SCHEMA.jobs (heartbeat_at)
                where status in ('claimed', 'running');
        "#,
        r#"
            create index jobs_owner_status_idx
                on :EXECUTION_QUEUE_SCHEMA.jobs (owner_id, status, run_at);
        "#,
        r#"
            create unique index jobs_owner_dedupe_key_idx
                on :EXECUTION_QUEUE_SCHEMA.jobs (owner_id, dedupe_key)
                where dedupe_key is not null and status in ('queued', 'claimed', 'running', 'failed');
        "#,
        r#"
            create function :EXECUTION_QUEUE_SCHEMA.tg_jobs__notify_new_jobs() returns trigger
                language plpgsql
                as $$
            begin
                perform pg_notify('jobs:insert', '');
                return null;
            end;
            $$;
        "#,
        r#"
            create trigger _900_notify_worker
                after insert on :EXECUTION_QUEUE_SCHEMA.jobs
                for each statement
                execute procedure :EXECUTION_QUEUE_SCHEMA.tg_jobs__notify_new_jobs();
        "#,
    ],
};
