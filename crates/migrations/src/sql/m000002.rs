use super::ExecutionQueueMigration;

pub const M000002_MIGRATION: ExecutionQueueMigration = ExecutionQueueMigration {
    name: "m000002",
    migration_number: 2,
    is_breaking: false,
    stmts: &[
        r#"
            create table :EXECUTION_QUEUE_SCHEMA.worker_heartbeats (
                worker_id text primary key,
                lane text,
                started_at timestamptz not null default now(),
                last_seen_at timestamptz not null default now()
            );
        "#,
        r#"
            create index worker_heartbeats_last_seen_idx
                on :EXECUTION_QUEUE_SCHEMA.worker_heartbeats (last_seen_at desc);
        "#,
    ],
};
