use std::future::Future;

use execution_queue_ctx::WorkerContext;
use serde::{de::DeserializeOwned, Serialize};

use crate::task_result::IntoTaskHandlerResult;

/// A job kind and the code that processes it.
///
/// The implementing type is the job payload: the worker deserializes the
/// stored payload into `Self` and calls [`TaskHandler::run`] on it.
///
/// ```
/// use execution_queue_ctx::WorkerContext;
/// use execution_queue_task_handler::{HandlerError, IntoTaskHandlerResult, TaskHandler};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct SyncMailbox {
///     mailbox: String,
/// }
///
/// impl TaskHandler for SyncMailbox {
///     const KIND: &'static str = "sync_mailbox";
///
///     async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
///         if self.mailbox.is_empty() {
///             return Err(HandlerError::validation("mailbox is empty"));
///         }
///         Ok(serde_json::json!({ "synced": self.mailbox }))
///     }
/// }
/// ```
pub trait TaskHandler: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind stored on the job row and used to route it to this handler
    const KIND: &'static str;

    fn run(
        self,
        ctx: WorkerContext,
    ) -> impl Future<Output = impl IntoTaskHandlerResult> + Send + 'static;
}
