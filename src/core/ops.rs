//! # Async Operation Core
//!
//! A waitable handle for named background work.
//!
//! [`Operation`] adapts "run work on a worker, signal completion, capture the
//! failure, invoke a callback" into a handle the caller can hold on to and
//! consume later. The handle is completed exactly once, by the worker, and
//! consumed by exactly one [`Operation::wait`] call, which blocks the calling
//! task until completion and then surfaces the captured result or re-raises
//! the captured error wrapped with the operation name for context.
//!
//! Because the primitive is generic and shared across unrelated call sites,
//! [`Operation::wait_named`] provides a defensive identity check: ending a
//! handle under the wrong operation name fails fast with
//! [`NetError::AsyncIdentityMismatch`] instead of silently consuming someone
//! else's result.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{NetError, Result};

/// Completion status delivered to callbacks.
///
/// Success carries no value: the value itself is reserved for the one
/// [`Operation::wait`] call. Failures are shared the same way event errors
/// are, so a callback can hold on to one without contending with `wait`.
pub type CompletionStatus = std::result::Result<(), Arc<NetError>>;

type OpCallback = Box<dyn FnOnce(CompletionStatus) + Send + 'static>;

struct OpState<T> {
    completed: bool,
    outcome: Option<std::result::Result<T, Arc<NetError>>>,
    callback: Option<OpCallback>,
    waiter: Option<oneshot::Sender<()>>,
}

struct OpShared<T> {
    name: &'static str,
    state: Mutex<OpState<T>>,
}

/// A waitable handle representing named background work.
///
/// Created when async work begins; completed exactly once (normally or
/// faulted); consumed by exactly one `wait` call.
pub struct Operation<T> {
    shared: Arc<OpShared<T>>,
    signal: oneshot::Receiver<()>,
}

impl<T: Send + 'static> Operation<T> {
    /// Run `work` on the runtime and return a handle to its completion.
    ///
    /// A panic in the worker is captured and surfaced as an error rather
    /// than lost.
    pub fn spawn<F>(name: &'static str, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let worker = tokio::spawn(work);
        Self::supervise(name, async move {
            match worker.await {
                Ok(result) => result,
                Err(join_err) => Err(NetError::Internal(format!(
                    "async operation '{name}' panicked: {join_err}"
                ))),
            }
        })
    }

    /// Run a synchronous closure on the blocking worker pool and return a
    /// handle to its completion.
    pub fn spawn_blocking<F>(name: &'static str, work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let worker = tokio::task::spawn_blocking(work);
        Self::supervise(name, async move {
            match worker.await {
                Ok(result) => result,
                Err(join_err) => Err(NetError::Internal(format!(
                    "async operation '{name}' panicked: {join_err}"
                ))),
            }
        })
    }

    fn supervise<F>(name: &'static str, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (waiter_tx, signal) = oneshot::channel();
        let shared = Arc::new(OpShared {
            name,
            state: Mutex::new(OpState {
                completed: false,
                outcome: None,
                callback: None,
                waiter: Some(waiter_tx),
            }),
        });

        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let result = work.await;
            complete(&task_shared, result);
        });

        Self { shared, signal }
    }

    /// Install a completion callback, invoked exactly once with the
    /// completion status. If the operation has already completed, the
    /// callback runs immediately.
    pub fn with_callback<F>(self, callback: F) -> Self
    where
        F: FnOnce(CompletionStatus) + Send + 'static,
    {
        let callback: OpCallback = Box::new(callback);
        // Keyed on the stored outcome, not the completion flag: completion
        // stores the outcome and takes any installed callback under one
        // lock, so the callback can be neither dropped nor run twice.
        let shared = Arc::clone(&self.shared);
        let status = {
            let Ok(mut state) = shared.state.lock() else {
                return self;
            };
            match state.outcome.as_ref() {
                Some(outcome) => status_of(outcome),
                None => {
                    state.callback = Some(callback);
                    return self;
                }
            }
        };
        callback(status);
        self
    }

    /// The name this operation was started under.
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Non-blocking completion flag.
    pub fn is_complete(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|state| state.completed)
            .unwrap_or(false)
    }

    /// Wait for the operation to complete and return its result.
    ///
    /// A captured error is re-raised wrapped with the operation name as
    /// context.
    pub async fn wait(self) -> Result<T> {
        // The sender is dropped only if the supervisor task itself was
        // aborted, e.g. during runtime shutdown.
        let _ = self.signal.await;

        let outcome = self
            .shared
            .state
            .lock()
            .map_err(|_| NetError::Internal("async operation state poisoned".to_string()))?
            .outcome
            .take();

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(shared_err)) => Err(match Arc::try_unwrap(shared_err) {
                Ok(err @ NetError::OperationFailed { .. }) => err,
                Ok(err) => NetError::OperationFailed {
                    operation: self.shared.name.to_string(),
                    source: Arc::new(err),
                },
                // A callback still holds the error; wrap the shared handle.
                Err(shared_err) => NetError::OperationFailed {
                    operation: self.shared.name.to_string(),
                    source: shared_err,
                },
            }),
            None => Err(NetError::Internal(format!(
                "async operation '{}' completed without a result",
                self.shared.name
            ))),
        }
    }

    /// Wait for a completion, verifying first that `name` matches the
    /// operation this handle was created for.
    pub async fn wait_named(self, name: &str) -> Result<T> {
        if name != self.shared.name {
            return Err(NetError::AsyncIdentityMismatch {
                expected: self.shared.name.to_string(),
                actual: name.to_string(),
            });
        }
        self.wait().await
    }
}

fn status_of<T>(outcome: &std::result::Result<T, Arc<NetError>>) -> CompletionStatus {
    match outcome {
        Ok(_) => Ok(()),
        Err(err) => Err(Arc::clone(err)),
    }
}

fn complete<T>(shared: &OpShared<T>, result: Result<T>) {
    if let Err(ref err) = result {
        debug!(operation = shared.name, error = %err, "async operation faulted");
    }

    let outcome = result.map_err(Arc::new);
    let status = status_of(&outcome);

    // One lock section: the outcome is visible before either consumer is
    // released, and a callback installed concurrently is either taken here
    // or runs immediately against the stored outcome.
    let (callback, waiter) = {
        let Ok(mut state) = shared.state.lock() else {
            return;
        };
        state.completed = true;
        state.outcome = Some(outcome);
        (state.callback.take(), state.waiter.take())
    };

    // Wake the waiter before running the callback: a slow or panicking
    // callback must not delay `wait` or lose the stored outcome.
    if let Some(waiter) = waiter {
        let _ = waiter.send(());
    }
    if let Some(callback) = callback {
        callback(status);
    }
}
