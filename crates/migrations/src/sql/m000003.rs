use super::ExecutionQueueMigration;

pub const M000003_MIGRATION: ExecutionQueueMigration = ExecutionQueueMigration {
    name: "m000003",
    migration_number: 3,
    is_breaking: true,
    stmts: &[
        r#"
            create sequence :EXECUTION_QUEUE_SCHEMA.jobs_lease_token_seq;
        "#,
        r#"
            alter table :EXECUTION_QUEUE_SCHEMA.jobs
                add column lease_token bigint;
        "#,
        r#"
            update :EXECUTION_QUEUE_SCHEMA.jobs
                set lease_token = nextval(':EXECUTION_QUEUE_SCHEMA.jobs_lease_token_seq')
                where status in ('claimed', 'running');
        "#,
        r#"
            alter table :EXECUTION_QUEUE_SCHEMA.jobs
                add constraint jobs_lease_has_token check (
                    status not in ('claimed', 'running') or lease_token is not null
                );
        "#,
    ],
};
