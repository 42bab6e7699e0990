//! The batch coordinator: collects queued queries, merges them, dispatches
//! the combined and unmerged queries through a caller-supplied executor, and
//! resolves each caller's handle with its own share of the result.
//!
//! On partial failure of the combined query the coordinator splits the
//! batch: queries whose projected slice failed are isolated into individual
//! requests for a clean error, the rest are re-merged and dispatched as one
//! retry pass. The retry pass never splits again, which bounds the recursion
//! to depth two.

use std::future::Future;
use std::mem;
use std::sync::Arc;

use futures::future::join_all;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tower::BoxError;

use crate::error::BatchError;
use crate::error::FetchError;
use crate::graphql::Query;
use crate::graphql::Response;
use crate::merge::merge;

/// The caller-supplied transport: sends one query to the query-serving
/// endpoint and returns its response.
///
/// Implemented for free by async closures:
///
/// ```ignore
/// let batch = Batch::new(|query: Query| async move { run_somewhere(query).await });
/// ```
pub trait QueryExecutor: Send + Sync + 'static {
    /// Execute a single query. Errors are transport-level failures; GraphQL
    /// field errors belong in the returned [`Response`].
    fn execute(&self, query: Query) -> BoxFuture<'static, Result<Response, BoxError>>;
}

impl<F, Fut> QueryExecutor for F
where
    F: Fn(Query) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + Send + 'static,
{
    fn execute(&self, query: Query) -> BoxFuture<'static, Result<Response, BoxError>> {
        Box::pin(self(query))
    }
}

/// Resolves with a queued query's response once its batch has executed.
#[derive(Debug)]
pub struct ResponseHandle {
    receiver: oneshot::Receiver<Result<Response, FetchError>>,
}

impl ResponseHandle {
    /// Wait for the response this query would have received standalone.
    pub async fn response(self) -> Result<Response, FetchError> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Aborted),
        }
    }
}

type Waiter = (Query, oneshot::Sender<Result<Response, FetchError>>);

#[derive(Debug)]
enum BatchState {
    Pending(Vec<Waiter>),
    Running,
    Finished,
}

/// A one-shot batch of queries sharing a single executor.
///
/// Queries are queued, then [`Batch::run`] merges and dispatches them all;
/// every handle resolves with a `{data, errors}` response mirroring what a
/// direct, unbatched call would have produced, and rejects only on a
/// transport or usage failure.
pub struct Batch {
    executor: Arc<dyn QueryExecutor>,
    state: Mutex<BatchState>,
}

impl Batch {
    pub fn new(executor: impl QueryExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            state: Mutex::new(BatchState::Pending(Vec::new())),
        }
    }

    /// Add a query to the batch.
    ///
    /// The query is cloned, so the same `Query` value can be queued any
    /// number of times. Queueing after [`Batch::run`] has been called is a
    /// usage error.
    pub fn queue(&self, query: &Query) -> Result<ResponseHandle, BatchError> {
        let mut state = self.state.lock();
        match &mut *state {
            BatchState::Pending(waiters) => {
                let (sender, receiver) = oneshot::channel();
                waiters.push((query.clone(), sender));
                tracing::trace!(pending = waiters.len(), "queued query into batch");
                Ok(ResponseHandle { receiver })
            }
            BatchState::Running | BatchState::Finished => Err(BatchError::AlreadyStarted),
        }
    }

    /// Execute every queued query, resolving all handles. One-shot: a
    /// second call is a usage error.
    pub async fn run(&self) -> Result<(), BatchError> {
        let waiters = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, BatchState::Running) {
                BatchState::Pending(waiters) => waiters,
                previous => {
                    *state = previous;
                    return Err(BatchError::AlreadyRun);
                }
            }
        };
        dispatch(self.executor.clone(), waiters, false).await;
        *self.state.lock() = BatchState::Finished;
        Ok(())
    }
}

/// One merge+dispatch pass over `waiters`.
///
/// `second_attempt` marks a retry pass: its combined response is projected
/// and delivered as-is instead of being split again.
fn dispatch(
    executor: Arc<dyn QueryExecutor>,
    waiters: Vec<Waiter>,
    second_attempt: bool,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if waiters.is_empty() {
            return;
        }
        let queries: Vec<Query> = waiters.iter().map(|(query, _)| query.clone()).collect();
        let merged = match merge(&queries) {
            Ok(merged) => merged,
            Err(error) => {
                let reason = error.to_string();
                for (_, sender) in waiters {
                    let _ = sender.send(Err(FetchError::MergeFailed {
                        reason: reason.clone(),
                    }));
                }
                return;
            }
        };

        // Split the senders between the combined dispatch and the
        // passthrough dispatches.
        let mut senders: Vec<Option<Waiter>> = waiters.into_iter().map(Some).collect();

        let mut dispatches: Vec<BoxFuture<'static, ()>> = Vec::new();
        for position in merged.unmerged_input_positions() {
            if let Some((query, sender)) = senders[position].take() {
                dispatches.push(Box::pin(execute_single(executor.clone(), query, sender)));
            }
        }

        if let Some(combined) = merged.merged_query().cloned() {
            let merged_waiters: Vec<Waiter> = merged
                .merged_input_positions()
                .into_iter()
                .filter_map(|position| senders[position].take())
                .collect();
            let executor = executor.clone();
            dispatches.push(Box::pin(async move {
                tracing::debug!(
                    queries = merged_waiters.len(),
                    second_attempt,
                    "dispatching combined query"
                );
                match executor.execute(combined).await {
                    Err(error) => {
                        // The whole combined call failed: every query that
                        // fed it shares the transport failure.
                        let reason = error.to_string();
                        for (_, sender) in merged_waiters {
                            let _ = sender.send(Err(FetchError::ExecutionError {
                                reason: reason.clone(),
                            }));
                        }
                    }
                    Ok(response) => {
                        let split = !second_attempt
                            && merged_waiters.len() > 1
                            && !response.errors.is_empty();
                        let responses = merged.unmerge_merged_queries(&response);
                        if !split {
                            for ((_, sender), response) in
                                merged_waiters.into_iter().zip(responses)
                            {
                                let _ = sender.send(Ok(response));
                            }
                        } else {
                            split_and_retry(executor, merged_waiters, responses).await;
                        }
                    }
                }
            }));
        }

        join_all(dispatches).await;
    })
}

/// The partial-failure recovery protocol: queries whose projected slice
/// carries an error are re-dispatched individually for a clean per-query
/// error; the rest are re-merged from scratch into one retry pass.
async fn split_and_retry(
    executor: Arc<dyn QueryExecutor>,
    merged_waiters: Vec<Waiter>,
    responses: Vec<Response>,
) {
    let mut retry = Vec::new();
    let mut isolated = Vec::new();
    for (waiter, response) in merged_waiters.into_iter().zip(responses) {
        if response.errors.is_empty() {
            retry.push(waiter);
        } else {
            isolated.push(waiter);
        }
    }
    tracing::debug!(
        isolated = isolated.len(),
        retried = retry.len(),
        "splitting batch after partial failure"
    );

    let mut dispatches: Vec<BoxFuture<'static, ()>> = Vec::new();
    for (query, sender) in isolated {
        dispatches.push(Box::pin(execute_single(executor.clone(), query, sender)));
    }
    dispatches.push(dispatch(executor, retry, true));
    join_all(dispatches).await;
}

async fn execute_single(
    executor: Arc<dyn QueryExecutor>,
    query: Query,
    sender: oneshot::Sender<Result<Response, FetchError>>,
) {
    let result = executor
        .execute(query)
        .await
        .map_err(|error| FetchError::ExecutionError {
            reason: error.to_string(),
        });
    let _ = sender.send(result);
}
