#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use execution_queue::{Job, JobSpec, JobStatus, RetryPolicy, WorkerOptions, WorkerUtils};
use sqlx::postgres::PgConnectOptions;
use sqlx::FromRow;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "execution_queue";

#[derive(FromRow, Debug)]
pub struct Migration {
    pub id: i32,
    pub ts: DateTime<Utc>,
    pub breaking: bool,
}

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub fn create_worker_options(&self) -> WorkerOptions {
        WorkerOptions::default()
            .pg_pool(self.test_pool.clone())
            .schema(SCHEMA)
            .concurrency(4)
            .poll_interval(Duration::from_millis(50))
            .retry_policy(fast_retry_policy())
    }

    /// Utils on a migrated schema with a backoff short enough for tests.
    pub async fn worker_utils(&self) -> WorkerUtils {
        let utils = WorkerUtils::new(self.test_pool.clone(), SCHEMA.to_string())
            .with_retry_policy(fast_retry_policy());
        utils.migrate().await.expect("Failed to migrate");
        utils
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        sqlx::query_as(&format!("select * from {SCHEMA}.jobs order by id asc"))
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get jobs")
    }

    pub async fn get_job(&self, job_id: i64) -> Job {
        sqlx::query_as(&format!("select * from {SCHEMA}.jobs where id = $1"))
            .bind(job_id)
            .fetch_one(&self.test_pool)
            .await
            .expect("Failed to get job")
    }

    /// Makes every queued job due, skipping backoff delays.
    pub async fn make_jobs_run_now(&self) {
        sqlx::query(&format!(
            "update {SCHEMA}.jobs set run_at = now() where status = 'queued'"
        ))
        .execute(&self.test_pool)
        .await
        .expect("Failed to update jobs");
    }

    /// Ages the heartbeat of every lease by `by`, as if its worker had died.
    pub async fn age_leases(&self, by: Duration) {
        sqlx::query(&format!(
            "update {SCHEMA}.jobs set heartbeat_at = heartbeat_at - $1::float8 * interval '1 second' where status in ('claimed', 'running')"
        ))
        .bind(by.as_secs_f64())
        .execute(&self.test_pool)
        .await
        .expect("Failed to age leases");
    }

    pub async fn age_worker_heartbeats(&self, by: Duration) {
        sqlx::query(&format!(
            "update {SCHEMA}.worker_heartbeats set last_seen_at = last_seen_at - $1::float8 * interval '1 second'"
        ))
        .bind(by.as_secs_f64())
        .execute(&self.test_pool)
        .await
        .expect("Failed to age worker heartbeats");
    }

    /// Polls until the job reaches `status`, panicking after a few seconds.
    pub async fn wait_for_status(&self, job_id: i64, status: JobStatus) -> Job {
        for _ in 0..200 {
            let job = self.get_job(job_id).await;
            if job.status() == &status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Job {job_id} never reached status {status}");
    }

    pub async fn get_migrations(&self) -> Vec<Migration> {
        sqlx::query_as(&format!("select * from {SCHEMA}.migrations order by id"))
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get migrations")
    }

    pub async fn add_job(
        &self,
        utils: &WorkerUtils,
        owner_id: &str,
        kind: &str,
        payload: serde_json::Value,
        spec: JobSpec,
    ) -> Job {
        utils
            .enqueue_raw(owner_id, kind, payload, spec)
            .await
            .expect("Failed to add job")
            .into_job()
    }
}

pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(10),
        Duration::from_millis(100),
        Duration::ZERO,
    )
}

pub async fn create_test_database() -> TestDatabase {
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_execution_queue");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = uuid::Uuid::now_v7();
    let db_name = format!("__test_execution_queue_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect_with(test_options)
        .await
        .expect("Failed to connect to test database");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database().await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

pub struct StaticCounter {
    cell: OnceCell<Mutex<u32>>,
}
async fn init_job_count() -> Mutex<u32> {
    Mutex::new(0)
}
impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn increment(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        let mut count = cell.lock().await;
        *count += 1;
        *count
    }

    pub async fn get(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        *cell.lock().await
    }
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
