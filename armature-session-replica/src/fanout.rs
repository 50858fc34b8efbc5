//! Concurrent dispatch of one operation to every backend.
//!
//! Every backend receives the call regardless of how the others fare; only
//! the way results are merged differs:
//!
//! - [`FirstWithData`]: the first backend to return a value wins, later
//!   responses are dropped
//! - [`WaitForAll`]: wait for every backend, any failure fails the operation
//! - [`UnionKeys`]: wait for every backend and count the distinct keys the
//!   successful ones returned
//!
//! Per-call state lives in an [`OperationTask`] owned by the dispatching
//! future, so responses are folded one at a time and never shared between
//! calls.

use crate::backend::BackendHandle;
use crate::error::{BackendError, BackendResult, StoreError, StoreResult};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters shared by all merge strategies.
#[derive(Debug, Default)]
pub struct Tally {
    /// Backends that have not answered yet
    pub remaining: usize,
    /// Successful responses
    pub succeeded: usize,
    /// Failed responses
    pub failed: usize,
    /// Most recent failure and the backend that reported it
    pub last_error: Option<(String, BackendError)>,
}

impl Tally {
    /// Take the most recent failure as a store error.
    fn take_error(&mut self) -> Option<StoreError> {
        self.last_error
            .take()
            .map(|(backend, source)| StoreError::Backend { backend, source })
    }
}

/// Rule for folding per-backend responses into one outcome.
pub trait MergeStrategy {
    /// Successful response from one backend.
    type Response;
    /// Outcome of the whole operation.
    type Output;

    /// Fold one successful response. Returning `Some` resolves the task early.
    fn accept(&mut self, response: Self::Response) -> Option<Self::Output>;

    /// Resolve once every backend has answered.
    fn settle(&mut self, tally: &mut Tally) -> Self::Output;
}

/// First backend holding a non-empty value wins.
#[derive(Debug, Default)]
pub struct FirstWithData;

impl MergeStrategy for FirstWithData {
    type Response = Option<Vec<u8>>;
    type Output = StoreResult<Option<Vec<u8>>>;

    fn accept(&mut self, response: Self::Response) -> Option<Self::Output> {
        response.filter(|bytes| !bytes.is_empty()).map(|bytes| Ok(Some(bytes)))
    }

    fn settle(&mut self, tally: &mut Tally) -> Self::Output {
        match tally.take_error() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

/// Every backend must succeed; the most recent failure is reported otherwise.
#[derive(Debug, Default)]
pub struct WaitForAll;

impl MergeStrategy for WaitForAll {
    type Response = ();
    type Output = StoreResult<()>;

    fn accept(&mut self, _response: ()) -> Option<Self::Output> {
        None
    }

    fn settle(&mut self, tally: &mut Tally) -> Self::Output {
        match tally.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Count of distinct keys across every backend that answered successfully.
#[derive(Debug, Default)]
pub struct UnionKeys {
    keys: HashSet<String>,
}

impl MergeStrategy for UnionKeys {
    type Response = Vec<String>;
    type Output = StoreResult<usize>;

    fn accept(&mut self, response: Self::Response) -> Option<Self::Output> {
        self.keys.extend(response);
        None
    }

    fn settle(&mut self, tally: &mut Tally) -> Self::Output {
        if tally.succeeded > 0 {
            return Ok(self.keys.len());
        }
        // No error either means there was nobody to ask
        match tally.take_error() {
            Some(err) => Err(err),
            None => Ok(0),
        }
    }
}

enum TaskStatus<T> {
    Pending,
    Resolved(T),
}

/// Coordination state for one store operation.
pub struct OperationTask<M: MergeStrategy> {
    tally: Tally,
    status: TaskStatus<M::Output>,
    merge: M,
}

impl<M: MergeStrategy> OperationTask<M> {
    /// Start a task expecting one response per backend. A task with no
    /// backends resolves immediately.
    pub fn new(merge: M, backends: usize) -> Self {
        let mut task = Self {
            tally: Tally {
                remaining: backends,
                ..Default::default()
            },
            status: TaskStatus::Pending,
            merge,
        };
        if backends == 0 {
            let output = task.merge.settle(&mut task.tally);
            task.status = TaskStatus::Resolved(output);
        }
        task
    }

    /// Whether the outcome is decided.
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, TaskStatus::Resolved(_))
    }

    /// Counters so far.
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Fold the response of `backend`. Responses after resolution are dropped.
    pub fn deliver(&mut self, backend: &str, result: BackendResult<M::Response>) {
        if self.is_resolved() {
            debug!(backend, "Dropping response for resolved operation");
            return;
        }
        self.tally.remaining = self.tally.remaining.saturating_sub(1);

        match result {
            Ok(response) => {
                self.tally.succeeded += 1;
                if let Some(output) = self.merge.accept(response) {
                    self.status = TaskStatus::Resolved(output);
                    return;
                }
            }
            Err(err) => {
                warn!(backend, error = %err, "Backend call failed");
                self.tally.failed += 1;
                self.tally.last_error = Some((backend.to_string(), err));
            }
        }

        if self.tally.remaining == 0 {
            let output = self.merge.settle(&mut self.tally);
            self.status = TaskStatus::Resolved(output);
        }
    }

    /// Consume the task. A task that is still pending settles with what it has.
    pub fn finish(mut self) -> M::Output {
        match self.status {
            TaskStatus::Resolved(output) => output,
            TaskStatus::Pending => self.merge.settle(&mut self.tally),
        }
    }
}

/// Run `call` against every backend concurrently and merge the results.
///
/// Each call runs on its own Tokio task, so calls still in flight when the
/// operation resolves keep running to completion; their results are dropped.
pub async fn dispatch<M, F, Fut>(backends: &[BackendHandle], merge: M, call: F) -> M::Output
where
    M: MergeStrategy,
    M::Response: Send + 'static,
    F: Fn(BackendHandle) -> Fut,
    Fut: Future<Output = BackendResult<M::Response>> + Send + 'static,
{
    let mut task = OperationTask::new(merge, backends.len());

    let mut pending: FuturesUnordered<_> = backends
        .iter()
        .enumerate()
        .map(|(index, backend)| {
            tokio::spawn(call(Arc::clone(backend))).map(move |joined| (index, joined))
        })
        .collect();

    while !task.is_resolved() {
        let Some((index, joined)) = pending.next().await else {
            break;
        };
        let result = joined.unwrap_or_else(|e| Err(BackendError::Aborted(e.to_string())));
        task.deliver(backends[index].name(), result);
    }

    debug!(
        succeeded = task.tally().succeeded,
        failed = task.tally().failed,
        unanswered = task.tally().remaining,
        "Operation resolved"
    );
    task.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> BackendError {
        BackendError::Connection("Connection refused".to_string())
    }

    #[test]
    fn test_first_with_data_resolves_on_first_value() {
        let mut task = OperationTask::new(FirstWithData, 3);

        task.deliver("a", Ok(None));
        assert!(!task.is_resolved());
        task.deliver("b", Ok(Some(b"{}".to_vec())));
        assert!(task.is_resolved());

        // Late responses are ignored
        task.deliver("c", Err(refused()));
        assert_eq!(task.tally().failed, 0);
        assert_eq!(task.finish().unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_first_with_data_survives_failures() {
        let mut task = OperationTask::new(FirstWithData, 2);

        task.deliver("a", Err(refused()));
        task.deliver("b", Ok(Some(b"1".to_vec())));
        assert_eq!(task.finish().unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_first_with_data_not_found_carries_last_error() {
        let mut task = OperationTask::new(FirstWithData, 3);

        task.deliver("a", Err(BackendError::Timeout));
        task.deliver("b", Ok(None));
        task.deliver("c", Err(refused()));

        let err = task.finish().unwrap_err();
        assert_eq!(err.backend(), Some("c"));
    }

    #[test]
    fn test_first_with_data_treats_empty_value_as_absent() {
        let mut task = OperationTask::new(FirstWithData, 1);
        task.deliver("a", Ok(Some(Vec::new())));
        assert_eq!(task.finish().unwrap(), None);
    }

    #[test]
    fn test_wait_for_all_reports_partial_failure() {
        let mut task = OperationTask::new(WaitForAll, 3);

        task.deliver("a", Ok(()));
        task.deliver("b", Err(refused()));
        assert!(!task.is_resolved());
        task.deliver("c", Ok(()));

        assert_eq!(task.tally().succeeded, 2);
        assert_eq!(task.tally().failed, 1);
        let err = task.finish().unwrap_err();
        assert_eq!(err.backend(), Some("b"));
    }

    #[test]
    fn test_wait_for_all_keeps_most_recent_error() {
        let mut task = OperationTask::new(WaitForAll, 2);
        task.deliver("a", Err(BackendError::Timeout));
        task.deliver("b", Err(refused()));

        match task.finish() {
            Err(StoreError::Backend { backend, source }) => {
                assert_eq!(backend, "b");
                assert_eq!(source, refused());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_union_keys_counts_distinct_keys() {
        let mut task = OperationTask::new(UnionKeys::default(), 2);
        task.deliver("a", Ok(vec!["a".to_string(), "b".to_string()]));
        task.deliver("b", Ok(vec!["b".to_string(), "c".to_string()]));

        assert_eq!(task.finish().unwrap(), 3);
    }

    #[test]
    fn test_union_keys_tolerates_partial_failure() {
        let mut task = OperationTask::new(UnionKeys::default(), 2);
        task.deliver("a", Err(refused()));
        task.deliver("b", Ok(vec!["x".to_string()]));

        assert_eq!(task.finish().unwrap(), 1);
    }

    #[test]
    fn test_union_keys_fails_when_every_backend_fails() {
        let mut task = OperationTask::new(UnionKeys::default(), 2);
        task.deliver("a", Err(refused()));
        task.deliver("b", Err(BackendError::Timeout));

        let err = task.finish().unwrap_err();
        assert_eq!(err.backend(), Some("b"));
    }

    #[test]
    fn test_empty_backend_list_resolves_immediately() {
        let task = OperationTask::new(FirstWithData, 0);
        assert!(task.is_resolved());
        assert_eq!(task.finish().unwrap(), None);

        let task = OperationTask::new(WaitForAll, 0);
        assert!(task.is_resolved());
        assert!(task.finish().is_ok());

        let task = OperationTask::new(UnionKeys::default(), 0);
        assert!(task.is_resolved());
        assert_eq!(task.finish().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_with_no_backends() {
        let count = dispatch(&[], UnionKeys::default(), |backend| async move {
            backend.keys("*").await
        })
        .await;
        assert_eq!(count.unwrap(), 0);
    }
}
