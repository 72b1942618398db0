//! Asynchronous result primitives.
//!
//! This module provides the vocabulary for every cross-actor call in the
//! kernel:
//!   - **AsyncResult**: a one-shot settable result cell (promise/future)
//!     with awaiting, timeout, cancellation, and continuation chaining
//!   - **RemoteCallback**: a one-shot reply handle that delivers a command's
//!     structured result back across an actor boundary
//!
//! An AsyncResult is in exactly one of four states — pending, value, fault,
//! cancelled — and the transition out of pending is one-way and terminal:
//! the first completion wins and later attempts are no-ops.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::time::Duration;

use crate::registry::Handle;
use crate::types::{Error, Result};

// =============================================================================
// AsyncResult
// =============================================================================

type Continuation<T> = Box<dyn FnOnce(&Result<T>) + Send>;

enum State<T> {
    Pending(Vec<Continuation<T>>),
    Done(Result<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// A one-shot asynchronous result cell.
///
/// Clones share the same cell: any clone may complete it, every clone may
/// await it. Faults and cancellation are terminal outcomes just like values.
pub struct AsyncResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    /// Create a pending result cell.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Vec::new())),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a result cell already completed with `value`.
    pub fn completed(value: T) -> Self {
        let result = Self::new();
        result.complete(value);
        result
    }

    /// Complete with a value. Returns false if the cell was already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Complete with a fault. Returns false if the cell was already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Cancel the cell. Waiters observe `Error::Cancelled`. Returns false if
    /// the cell was already settled.
    pub fn cancel(&self) -> bool {
        self.settle(Err(Error::cancelled("result cancelled")))
    }

    /// Whether the cell has been settled (value, fault, or cancelled).
    pub fn is_done(&self) -> bool {
        matches!(&*self.lock_state(), State::Done(_))
    }

    /// Whether the cell was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.lock_state(), State::Done(Err(Error::Cancelled(_))))
    }

    /// Await the outcome.
    pub async fn get(&self) -> Result<T> {
        loop {
            // Register interest before checking state so a concurrent settle
            // cannot slip between the check and the await.
            let notified = self.inner.notify.notified();
            if let State::Done(outcome) = &*self.lock_state() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Await the outcome with a timeout.
    ///
    /// A timeout only unblocks this waiter — the underlying operation may
    /// still settle the cell later.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout(format!(
                "result not available within {:?}",
                timeout
            ))),
        }
    }

    /// Register a continuation, invoked with the outcome when the cell
    /// settles (immediately if it already has).
    pub fn then(&self, continuation: impl FnOnce(&Result<T>) + Send + 'static) {
        let outcome = {
            let mut state = self.lock_state();
            match &mut *state {
                State::Pending(continuations) => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                State::Done(outcome) => outcome.clone(),
            }
        };
        continuation(&outcome);
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let continuations = {
            let mut state = self.lock_state();
            match &mut *state {
                State::Pending(continuations) => {
                    let continuations = std::mem::take(continuations);
                    *state = State::Done(outcome.clone());
                    continuations
                }
                State::Done(_) => return false,
            }
        };
        for continuation in continuations {
            continuation(&outcome);
        }
        self.inner.notify.notify_waiters();
        true
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.lock() {
            Ok(guard) => match &*guard {
                State::Pending(_) => "pending",
                State::Done(Ok(_)) => "value",
                State::Done(Err(Error::Cancelled(_))) => "cancelled",
                State::Done(Err(_)) => "fault",
            },
            Err(_) => "poisoned",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

// =============================================================================
// RemoteCallback
// =============================================================================

/// Structured reply to a process command.
#[derive(Debug, Clone)]
pub struct ResultData {
    pub success: bool,
    /// Bound service handle, present on successful bind replies.
    pub handle: Option<Handle>,
}

impl ResultData {
    pub fn ok() -> Self {
        Self {
            success: true,
            handle: None,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: Option<Handle>) -> Self {
        self.handle = handle;
        self
    }
}

type ResultListener = Box<dyn FnOnce(ResultData) + Send>;

/// A one-shot reply handle delivering a command's result across an actor
/// boundary.
///
/// Cloning shares the underlying listener; the first `send_result` consumes
/// it and later deliveries are dropped.
#[derive(Clone)]
pub struct RemoteCallback {
    listener: Arc<Mutex<Option<ResultListener>>>,
}

impl RemoteCallback {
    pub fn new(listener: impl FnOnce(ResultData) + Send + 'static) -> Self {
        Self {
            listener: Arc::new(Mutex::new(Some(Box::new(listener)))),
        }
    }

    /// Deliver the result. No-op if a result was already delivered.
    pub fn send_result(&self, data: ResultData) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener(data);
        }
    }
}

impl fmt::Debug for RemoteCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCallback").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
