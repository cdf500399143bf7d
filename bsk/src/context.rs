//! Task-scoped request context for logging correlation.
//!
//! The only process-wide carrier in the kit: `request_id` and the
//! `batch_request_ids` of the batch currently being streamed. It is opt-in
//! at the log site and never required by core logic; code that does not
//! call [`RequestContext::current`] behaves identically with or without a
//! scope installed.

use std::future::Future;

tokio::task_local! {
    static CURRENT: RequestContext;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub batch_request_ids: Vec<String>,
}

impl RequestContext {
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        RequestContext {
            request_id: Some(request_id.into()),
            batch_request_ids: Vec::new(),
        }
    }

    pub fn for_batch(batch_request_ids: Vec<String>) -> Self {
        RequestContext {
            request_id: None,
            batch_request_ids,
        }
    }

    /// The context installed for the current task, if any.
    pub fn current() -> Option<RequestContext> {
        CURRENT.try_with(|context| context.clone()).ok()
    }

    /// Runs `future` with this context installed for the task.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT.scope(self, future).await
    }
}
