//! Process manager — owns the map of named processes.
//!
//! Processes are created lazily on first demand and reused by name. Stops
//! are scheduled on the manager's own serialized executor task so that a
//! slow process teardown never blocks the caller; removing the name from
//! the map *before* scheduling guarantees a concurrent start for the same
//! name gets a fresh process instead of racing the one being stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::process::{Process, ProcessHandle};
use crate::concurrent::AsyncResult;
use crate::service::ServiceLoader;
use crate::types::KernelConfig;

type StopJob = BoxFuture<'static, ()>;

struct ProcessEntry {
    process: Process,
    handle: ProcessHandle,
}

struct ManagerState {
    processes: HashMap<String, ProcessEntry>,
    /// Diagnostic id→name table; entries live until the stop completes.
    pids: HashMap<u64, String>,
    next_pid: u64,
}

/// Creates, reuses, and stops named processes.
pub(crate) struct ProcessManager {
    config: KernelConfig,
    loader: Arc<ServiceLoader>,
    state: Arc<Mutex<ManagerState>>,
    jobs: Mutex<Option<mpsc::UnboundedSender<StopJob>>>,
    executor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ProcessManager")
            .field("processes", &state.processes.len())
            .finish_non_exhaustive()
    }
}

impl ProcessManager {
    pub(crate) fn new(loader: Arc<ServiceLoader>, config: KernelConfig) -> Self {
        Self {
            config,
            loader,
            state: Arc::new(Mutex::new(ManagerState {
                processes: HashMap::new(),
                pids: HashMap::new(),
                next_pid: 1,
            })),
            jobs: Mutex::new(None),
            executor: Mutex::new(None),
        }
    }

    /// Spawn the serialized stop executor.
    pub(crate) fn start(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StopJob>();
        let executor = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        *self.lock_jobs() = Some(tx);
        *self.lock_executor() = Some(executor);
    }

    /// Drain and join the stop executor. Scheduled stops run to completion.
    pub(crate) async fn shutdown(&self) {
        self.lock_jobs().take();
        let executor = self.lock_executor().take();
        if let Some(executor) = executor {
            tracing::debug!("shutting down process manager");
            let _ = executor.await;
            tracing::debug!("process manager has been shut down");
        }
    }

    /// Return the command interface of the process named `name`, creating
    /// and starting it first if needed. Check-then-create runs under one
    /// lock, so at most one process ever exists per name.
    pub(crate) fn start_process(&self, name: &str) -> ProcessHandle {
        let mut state = self.lock_state();
        if let Some(entry) = state.processes.get(name) {
            return entry.handle.clone();
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        let mut process = Process::new(pid, name, self.loader.clone());
        let handle = process.start();
        state.pids.insert(pid, name.to_string());
        state.processes.insert(
            name.to_string(),
            ProcessEntry {
                process,
                handle: handle.clone(),
            },
        );
        handle
    }

    /// Fire-and-forget stop with the configured shutdown timeout. Returns
    /// false if no process with `name` exists.
    pub(crate) fn stop_process(&self, name: &str) -> bool {
        match self.take_entry(name) {
            Some(entry) => {
                self.schedule_stop(entry, self.config.shutdown_timeout, None);
                true
            }
            None => false,
        }
    }

    /// Stop with an explicit timeout; the result completes with `true` once
    /// the stop finished, `false` if the name was unknown.
    pub(crate) fn stop_process_timeout(&self, name: &str, timeout: Duration) -> AsyncResult<bool> {
        match self.take_entry(name) {
            Some(entry) => {
                let promise = AsyncResult::new();
                self.schedule_stop(entry, timeout, Some(promise.clone()));
                promise
            }
            None => AsyncResult::completed(false),
        }
    }

    /// Diagnostic lookup: name of the process with the given id.
    pub(crate) fn process_name(&self, pid: u64) -> Option<String> {
        self.lock_state().pids.get(&pid).cloned()
    }

    fn take_entry(&self, name: &str) -> Option<ProcessEntry> {
        self.lock_state().processes.remove(name)
    }

    fn schedule_stop(
        &self,
        entry: ProcessEntry,
        timeout: Duration,
        promise: Option<AsyncResult<bool>>,
    ) {
        let slow_warning = self.config.slow_stop_warning;
        let state = self.state.clone();
        let job = async move {
            let ProcessEntry { mut process, .. } = entry;
            process.stop(timeout, slow_warning).await;
            if process.is_failed() {
                tracing::warn!("process {} stopped after an uncaught fault", process.name());
            }
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pids
                .remove(&process.id());
            if let Some(promise) = promise {
                promise.complete(true);
            }
        }
        .boxed();

        if let Some(jobs) = &*self.lock_jobs() {
            let _ = jobs.send(job);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<StopJob>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_executor(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.executor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
