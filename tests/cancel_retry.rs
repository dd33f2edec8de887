use execution_queue::{ExecutionQueueError, HandlerError, JobOutcome, JobSpec, JobStatus};
use serde_json::json;

mod helpers;

#[tokio::test]
async fn cancel_queued_job() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        let job = test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), JobSpec::default())
            .await;

        let canceled = utils
            .cancel(*job.id(), "owner_1", Some("user disconnected"))
            .await
            .expect("Failed to cancel");

        assert_eq!(canceled.status(), &JobStatus::Canceled);
        assert_eq!(canceled.cancel_reason().as_deref(), Some("user disconnected"));
        assert!(canceled.finished_at().is_some());
        assert!(utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .is_none());
    })
    .await;
}

#[tokio::test]
async fn cancel_running_job_voids_the_lease() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), JobSpec::default())
            .await;

        let job = utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .expect("No job claimed");
        utils
            .mark_running(&job.lease().unwrap())
            .await
            .expect("Failed to mark running");

        utils
            .cancel(*job.id(), "owner_1", None)
            .await
            .expect("Failed to cancel");

        assert!(!utils
            .heartbeat(&job.lease().unwrap())
            .await
            .expect("Failed to heartbeat"));
        let late = utils
            .finalize(&job.lease().unwrap(), JobOutcome::Success(None))
            .await;
        assert!(matches!(late, Err(ExecutionQueueError::LeaseLost { .. })));

        let job = test_db.get_job(*job.id()).await;
        assert_eq!(job.status(), &JobStatus::Canceled);
        assert!(job.claimed_by().is_none());
    })
    .await;
}

#[tokio::test]
async fn cancel_terminal_job_is_a_no_op() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), JobSpec::default())
            .await;

        let job = utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .expect("No job claimed");
        let done = utils
            .finalize(&job.lease().unwrap(), JobOutcome::Success(None))
            .await
            .expect("Failed to finalize");

        let after = utils
            .cancel(*job.id(), "owner_1", Some("too late"))
            .await
            .expect("Cancel of terminal job should succeed");
        assert_eq!(after.status(), &JobStatus::Succeeded);
        assert_eq!(after.cancel_reason(), &None);
        assert_eq!(after.finished_at(), done.finished_at());
    })
    .await;
}

#[tokio::test]
async fn cancel_is_scoped_to_owner() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        let job = test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), JobSpec::default())
            .await;

        let res = utils.cancel(*job.id(), "owner_2", None).await;
        assert!(matches!(res, Err(ExecutionQueueError::NotFound { job_id }) if job_id == *job.id()));

        let res = utils.cancel(i64::MAX, "owner_1", None).await;
        assert!(matches!(res, Err(ExecutionQueueError::NotFound { .. })));

        assert_eq!(test_db.get_job(*job.id()).await.status(), &JobStatus::Queued);
    })
    .await;
}

#[tokio::test]
async fn retry_revives_dead_letter_job() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        test_db
            .add_job(
                &utils,
                "owner_1",
                "email_sync",
                json!({}),
                JobSpec::builder().max_attempts(1).build(),
            )
            .await;

        let job = utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .expect("No job claimed");
        let dead = utils
            .finalize(&job.lease().unwrap(), HandlerError::permanent("bad data").into())
            .await
            .expect("Failed to finalize");
        assert_eq!(dead.status(), &JobStatus::DeadLetter);

        let revived = utils.retry(*job.id()).await.expect("Failed to retry");
        assert_eq!(revived.status(), &JobStatus::Queued);
        assert_eq!(*revived.attempts(), 0);
        assert_eq!(revived.last_error(), &None);
        assert!(revived.finished_at().is_none());

        let again = utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .expect("Revived job not claimable");
        assert_eq!(again.id(), job.id());
        assert_eq!(*again.attempts(), 1);
    })
    .await;
}

#[tokio::test]
async fn retry_rejects_leased_and_finished_jobs() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), JobSpec::default())
            .await;

        let job = utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .expect("No job claimed");
        let res = utils.retry(*job.id()).await;
        assert!(matches!(
            res,
            Err(ExecutionQueueError::InvalidTransition {
                from: JobStatus::Claimed,
                ..
            })
        ));

        utils
            .finalize(&job.lease().unwrap(), JobOutcome::Success(None))
            .await
            .expect("Failed to finalize");
        let res = utils.retry(*job.id()).await;
        assert!(matches!(
            res,
            Err(ExecutionQueueError::InvalidTransition {
                from: JobStatus::Succeeded,
                ..
            })
        ));

        let res = utils.retry(i64::MAX).await;
        assert!(matches!(res, Err(ExecutionQueueError::NotFound { .. })));
    })
    .await;
}

#[tokio::test]
async fn retry_conflicts_with_live_job_holding_the_key() {
    helpers::with_test_db(|test_db| async move {
        let utils = test_db.worker_utils().await;
        let spec = JobSpec::builder().dedupe_key("sync:inbox").build();
        test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), spec.clone())
            .await;

        let job = utils
            .claim("worker_a", None)
            .await
            .expect("Failed to claim")
            .expect("No job claimed");
        utils
            .finalize(&job.lease().unwrap(), HandlerError::validation("bad").into())
            .await
            .expect("Failed to finalize");

        test_db
            .add_job(&utils, "owner_1", "email_sync", json!({}), spec)
            .await;

        let res = utils.retry(*job.id()).await;
        assert!(matches!(res, Err(ExecutionQueueError::DedupeConflict { .. })));
        assert_eq!(
            test_db.get_job(*job.id()).await.status(),
            &JobStatus::DeadLetter
        );
    })
    .await;
}
