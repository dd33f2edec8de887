pub mod add_job;
pub mod cancel_job;
pub mod complete_job;
pub mod fail_job;
pub mod get_job;
pub mod health;
pub mod heartbeat;
pub mod inspect;
pub mod job_query_helpers;
pub mod mark_running;
pub mod reclaim;
pub mod retry_job;
pub mod worker_heartbeat;
