use std::rc::Rc;
use std::time::Duration;

use execution_queue::{
    HandlerError, IntoTaskHandlerResult, JobSpec, JobStatus, TaskHandler, WorkerContext,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::spawn_local;

use crate::helpers::StaticCounter;

mod helpers;

static SYNC_CALL_COUNT: StaticCounter = StaticCounter::new();
static FLAKY_CALL_COUNT: StaticCounter = StaticCounter::new();
static DIGEST_CALL_COUNT: StaticCounter = StaticCounter::new();
static WATCHER_CANCELED_COUNT: StaticCounter = StaticCounter::new();

#[derive(Serialize, Deserialize)]
struct SyncMailbox {
    mailbox: String,
}

impl TaskHandler for SyncMailbox {
    const KIND: &'static str = "email_sync";

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        SYNC_CALL_COUNT.increment().await;
        Ok::<_, HandlerError>(json!({ "mailbox": self.mailbox, "synced": 3 }))
    }
}

#[derive(Serialize, Deserialize)]
struct SendDigest {
    address: String,
}

impl TaskHandler for SendDigest {
    const KIND: &'static str = "send_digest";

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        DIGEST_CALL_COUNT.increment().await;
        Ok::<(), String>(())
    }
}

/// Times out on its first attempt.
#[derive(Serialize, Deserialize)]
struct FlakyUpstream {}

impl TaskHandler for FlakyUpstream {
    const KIND: &'static str = "flaky_upstream";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        FLAKY_CALL_COUNT.increment().await;
        if *ctx.job().attempts() == 1 {
            return Err(HandlerError::timeout("upstream did not answer"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Explode {}

impl TaskHandler for Explode {
    const KIND: &'static str = "explode";

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        if true {
            panic!("boom");
        }
        Ok::<(), String>(())
    }
}

/// Runs until its lease is lost.
#[derive(Serialize, Deserialize)]
struct WatchMailbox {}

impl TaskHandler for WatchMailbox {
    const KIND: &'static str = "watch_mailbox";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        ctx.cancelled().await;
        WATCHER_CANCELED_COUNT.increment().await;
        Err::<(), _>(HandlerError::transient("stopped watching"))
    }
}

/// Never finishes on its own.
#[derive(Serialize, Deserialize)]
struct Sleepy {}

impl TaskHandler for Sleepy {
    const KIND: &'static str = "sleepy";

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[tokio::test]
async fn run_once_processes_registered_kinds() {
    helpers::with_test_db(|test_db| async move {
        let worker = test_db
            .create_worker_options()
            .define_job::<SyncMailbox>()
            .init()
            .await
            .expect("Failed to create worker");
        let utils = worker.create_utils();

        let job = utils
            .enqueue(
                "owner_1",
                SyncMailbox {
                    mailbox: "inbox".into(),
                },
                JobSpec::default(),
            )
            .await
            .expect("Failed to enqueue")
            .into_job();
        let unknown = test_db
            .add_job(&utils, "owner_1", "not_registered", json!({}), JobSpec::default())
            .await;

        worker.run_once().await.expect("Failed to run worker");

        assert_eq!(SYNC_CALL_COUNT.get().await, 1);
        let done = test_db.get_job(*job.id()).await;
        assert_eq!(done.status(), &JobStatus::Succeeded);
        assert_eq!(done.last_result(), &Some(json!({ "mailbox": "inbox", "synced": 3 })));
        assert_eq!(*done.attempts(), 1);

        let untouched = test_db.get_job(*unknown.id()).await;
        assert_eq!(untouched.status(), &JobStatus::Queued);
        assert_eq!(*untouched.attempts(), 0);
    })
    .await;
}

#[tokio::test]
async fn run_once_schedules_retry_after_transient_error() {
    helpers::with_test_db(|test_db| async move {
        let worker = test_db
            .create_worker_options()
            .define_job::<FlakyUpstream>()
            .init()
            .await
            .expect("Failed to create worker");
        let utils = worker.create_utils();

        let job = utils
            .enqueue("owner_1", FlakyUpstream {}, JobSpec::default())
            .await
            .expect("Failed to enqueue")
            .into_job();

        worker.run_once().await.expect("Failed to run worker");
        let failed = test_db.get_job(*job.id()).await;
        assert_eq!(failed.status(), &JobStatus::Queued);
        assert_eq!(*failed.attempts(), 1);
        assert_eq!(
            failed.last_error().as_deref(),
            Some("[timeout] upstream did not answer")
        );

        test_db.make_jobs_run_now().await;
        worker.run_once().await.expect("Failed to run worker");

        let done = test_db.get_job(*job.id()).await;
        assert_eq!(done.status(), &JobStatus::Succeeded);
        assert_eq!(*done.attempts(), 2);
        assert_eq!(FLAKY_CALL_COUNT.get().await, 2);
    })
    .await;
}

#[tokio::test]
async fn panicking_handler_is_recorded_as_failure() {
    helpers::with_test_db(|test_db| async move {
        let worker = test_db
            .create_worker_options()
            .define_job::<Explode>()
            .init()
            .await
            .expect("Failed to create worker");
        let utils = worker.create_utils();

        let job = utils
            .enqueue(
                "owner_1",
                Explode {},
                JobSpec::builder().max_attempts(1).build(),
            )
            .await
            .expect("Failed to enqueue")
            .into_job();

        worker.run_once().await.expect("Failed to run worker");

        let dead = test_db.get_job(*job.id()).await;
        assert_eq!(dead.status(), &JobStatus::DeadLetter);
        assert_eq!(dead.last_error().as_deref(), Some("handler panicked: boom"));
    })
    .await;
}

#[tokio::test]
async fn payload_mismatch_dead_letters() {
    helpers::with_test_db(|test_db| async move {
        let worker = test_db
            .create_worker_options()
            .define_job::<SyncMailbox>()
            .init()
            .await
            .expect("Failed to create worker");
        let utils = worker.create_utils();

        let job = test_db
            .add_job(&utils, "owner_1", "email_sync", json!({ "wrong": true }), JobSpec::default())
            .await;

        worker.run_once().await.expect("Failed to run worker");

        let dead = test_db.get_job(*job.id()).await;
        assert_eq!(dead.status(), &JobStatus::DeadLetter);
        assert_eq!(*dead.attempts(), 1);
        assert!(dead
            .last_error()
            .as_deref()
            .is_some_and(|e| e.starts_with("[validation]")));
    })
    .await;
}

#[tokio::test]
async fn run_picks_up_new_jobs_until_shutdown() {
    helpers::with_test_db(|test_db| async move {
        let worker = Rc::new(
            test_db
                .create_worker_options()
                .define_job::<SendDigest>()
                .init()
                .await
                .expect("Failed to create worker"),
        );
        let utils = worker.create_utils();

        let worker_handle = {
            let worker = worker.clone();
            spawn_local(async move { worker.run().await })
        };

        let job = utils
            .enqueue(
                "owner_1",
                SendDigest {
                    address: "someone@example.com".into(),
                },
                JobSpec::default(),
            )
            .await
            .expect("Failed to enqueue")
            .into_job();

        test_db
            .wait_for_status(*job.id(), JobStatus::Succeeded)
            .await;
        assert_eq!(DIGEST_CALL_COUNT.get().await, 1);

        let health = utils.health_counts(None).await.expect("Failed to count");
        assert!(*health.worker_alive());

        worker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), worker_handle)
            .await
            .expect("Worker did not stop")
            .expect("Worker task failed")
            .expect("Worker returned an error");
    })
    .await;
}

#[tokio::test]
async fn lost_lease_cancels_running_handler() {
    helpers::with_test_db(|test_db| async move {
        let worker = Rc::new(
            test_db
                .create_worker_options()
                .lease_timeout(Duration::from_secs(3))
                .heartbeat_interval(Duration::from_millis(100))
                .define_job::<WatchMailbox>()
                .init()
                .await
                .expect("Failed to create worker"),
        );
        let utils = worker.create_utils();

        let worker_handle = {
            let worker = worker.clone();
            spawn_local(async move { worker.run().await })
        };

        let job = utils
            .enqueue("owner_1", WatchMailbox {}, JobSpec::default())
            .await
            .expect("Failed to enqueue")
            .into_job();
        test_db.wait_for_status(*job.id(), JobStatus::Running).await;

        utils
            .cancel(*job.id(), "owner_1", Some("mailbox removed"))
            .await
            .expect("Failed to cancel");

        for _ in 0..100 {
            if WATCHER_CANCELED_COUNT.get().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(WATCHER_CANCELED_COUNT.get().await, 1);

        // the handler's late error must not overwrite the cancel
        tokio::time::sleep(Duration::from_millis(200)).await;
        let canceled = test_db.get_job(*job.id()).await;
        assert_eq!(canceled.status(), &JobStatus::Canceled);
        assert_eq!(canceled.last_error(), &None);

        worker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), worker_handle)
            .await
            .expect("Worker did not stop")
            .expect("Worker task failed")
            .expect("Worker returned an error");
    })
    .await;
}

#[tokio::test]
async fn shutdown_aborts_handlers_after_timeout() {
    helpers::with_test_db(|test_db| async move {
        let worker = Rc::new(
            test_db
                .create_worker_options()
                .shutdown_timeout(Duration::from_millis(100))
                .define_job::<Sleepy>()
                .init()
                .await
                .expect("Failed to create worker"),
        );
        let utils = worker.create_utils();

        let worker_handle = {
            let worker = worker.clone();
            spawn_local(async move { worker.run().await })
        };

        let job = utils
            .enqueue("owner_1", Sleepy {}, JobSpec::default())
            .await
            .expect("Failed to enqueue")
            .into_job();
        test_db.wait_for_status(*job.id(), JobStatus::Running).await;

        worker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), worker_handle)
            .await
            .expect("Worker did not stop")
            .expect("Worker task failed")
            .expect("Worker returned an error");

        let interrupted = test_db.get_job(*job.id()).await;
        assert_eq!(interrupted.status(), &JobStatus::Queued);
        assert_eq!(*interrupted.attempts(), 1);
        assert_eq!(
            interrupted.last_error().as_deref(),
            Some("handler was aborted")
        );
        assert!(interrupted.claimed_by().is_none());
    })
    .await;
}
