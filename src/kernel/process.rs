//! Process — per-context service host and command executor.
//!
//! A process owns one execution context: a single mailbox task that
//! executes lifecycle commands one at a time against its local service
//! table. The process is its own failure domain — a panic in a hosted hook
//! marks the process failed without crashing anything else.
//!
//! State machine: `Created → Started → (hosting N≥0 services) → Stopping →
//! Stopped`. `start` spawns the mailbox task; `stop` drains the table and
//! joins it; the id is released by the owning process manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::supervisor::{run_hook, HookOutcome};
use crate::concurrent::{RemoteCallback, ResultData};
use crate::service::{Service, ServiceContext, ServiceLoader};
use crate::types::{ConnectionId, Error, Result, ServiceRequest, ServiceTarget};

/// Commands executed on a process's mailbox task, strictly in submission
/// order.
#[derive(Debug)]
pub(crate) enum ProcessCommand {
    CreateService {
        request: ServiceRequest,
        callback: RemoteCallback,
    },
    StartService {
        request: ServiceRequest,
        flags: u32,
        start_id: i32,
        callback: RemoteCallback,
    },
    StopService {
        request: ServiceRequest,
        callback: Option<RemoteCallback>,
    },
    BindService {
        request: ServiceRequest,
        connection: ConnectionId,
        flags: u32,
        callback: RemoteCallback,
    },
    UnbindService {
        request: ServiceRequest,
        callback: Option<RemoteCallback>,
    },
    Quit,
}

/// Location-transparent command interface to a process.
///
/// A failed dispatch means the mailbox task is gone — a system failure for
/// the caller, never a policy failure.
#[derive(Debug, Clone)]
pub(crate) struct ProcessHandle {
    name: String,
    mailbox: mpsc::UnboundedSender<ProcessCommand>,
}

impl ProcessHandle {
    pub(crate) fn create_service(
        &self,
        request: ServiceRequest,
        callback: RemoteCallback,
    ) -> Result<()> {
        self.send(ProcessCommand::CreateService { request, callback })
    }

    pub(crate) fn start_service(
        &self,
        request: ServiceRequest,
        flags: u32,
        start_id: i32,
        callback: RemoteCallback,
    ) -> Result<()> {
        self.send(ProcessCommand::StartService {
            request,
            flags,
            start_id,
            callback,
        })
    }

    pub(crate) fn stop_service(
        &self,
        request: ServiceRequest,
        callback: Option<RemoteCallback>,
    ) -> Result<()> {
        self.send(ProcessCommand::StopService { request, callback })
    }

    pub(crate) fn bind_service(
        &self,
        request: ServiceRequest,
        connection: ConnectionId,
        flags: u32,
        callback: RemoteCallback,
    ) -> Result<()> {
        self.send(ProcessCommand::BindService {
            request,
            connection,
            flags,
            callback,
        })
    }

    pub(crate) fn unbind_service(
        &self,
        request: ServiceRequest,
        callback: Option<RemoteCallback>,
    ) -> Result<()> {
        self.send(ProcessCommand::UnbindService { request, callback })
    }

    fn send(&self, command: ProcessCommand) -> Result<()> {
        self.mailbox.send(command).map_err(|_| {
            Error::system_failure(format!("mailbox of process {} is gone", self.name))
        })
    }
}

struct HostedService {
    service: Box<dyn Service>,
    #[allow(dead_code)] // held for the instance's lifetime, released on stop
    context: ServiceContext,
}

/// State shared between the mailbox task and the process owner.
struct ProcessState {
    services: Mutex<HashMap<ServiceTarget, HostedService>>,
    /// Signalled when a service is removed or the failure flag flips.
    changed: Notify,
    failed: AtomicBool,
}

impl ProcessState {
    fn lock_services(&self) -> std::sync::MutexGuard<'_, HashMap<ServiceTarget, HostedService>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A process: one execution context hosting zero or more services.
pub(crate) struct Process {
    id: u64,
    name: String,
    loader: Arc<ServiceLoader>,
    state: Arc<ProcessState>,
    mailbox: Option<mpsc::UnboundedSender<ProcessCommand>>,
    task: Option<JoinHandle<()>>,
}

impl Process {
    pub(crate) fn new(id: u64, name: impl Into<String>, loader: Arc<ServiceLoader>) -> Self {
        Self {
            id,
            name: name.into(),
            loader,
            state: Arc::new(ProcessState {
                services: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                failed: AtomicBool::new(false),
            }),
            mailbox: None,
            task: None,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// Spawn the mailbox task and return the command interface.
    pub(crate) fn start(&mut self) -> ProcessHandle {
        tracing::debug!("starting process {}", self.name);

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ProcessWorker {
            name: self.name.clone(),
            loader: self.loader.clone(),
            state: self.state.clone(),
        };
        self.task = Some(tokio::spawn(worker.run(rx)));
        self.mailbox = Some(tx.clone());

        ProcessHandle {
            name: self.name.clone(),
            mailbox: tx,
        }
    }

    /// Stop the process: send a stop command for every hosted service, wait
    /// for the table to drain (or the failure flag, or the deadline), then
    /// quit and join the mailbox task.
    ///
    /// Invoked by the owner, never from a hosted service.
    pub(crate) async fn stop(&mut self, timeout: Duration, slow_warning: Duration) {
        tracing::debug!("stopping process {}", self.name);
        let started = Instant::now();

        let targets: Vec<ServiceTarget> = self.state.lock_services().keys().cloned().collect();
        if !targets.is_empty() {
            if let Some(mailbox) = &self.mailbox {
                for target in targets {
                    let _ = mailbox.send(ProcessCommand::StopService {
                        request: ServiceRequest::new(target),
                        callback: None,
                    });
                }
            }

            let deadline = started + timeout;
            loop {
                let notified = self.state.changed.notified();
                if self.state.failed.load(Ordering::SeqCst)
                    || self.state.lock_services().is_empty()
                {
                    break;
                }
                if Instant::now() >= deadline {
                    break;
                }
                let _ = tokio::time::timeout_at(deadline, notified).await;
            }
        }

        if let Some(mailbox) = self.mailbox.take() {
            let _ = mailbox.send(ProcessCommand::Quit);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        tracing::debug!("process {} has been stopped", self.name);
        let elapsed = started.elapsed();
        if elapsed >= slow_warning {
            tracing::warn!(
                "stopping process {} took {}ms",
                self.name,
                elapsed.as_millis()
            );
        }
    }
}

/// The mailbox task: executes commands one at a time.
struct ProcessWorker {
    name: String,
    loader: Arc<ServiceLoader>,
    state: Arc<ProcessState>,
}

impl ProcessWorker {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<ProcessCommand>) {
        while let Some(command) = mailbox.recv().await {
            match command {
                ProcessCommand::CreateService { request, callback } => {
                    self.create_service(request, callback).await;
                }
                ProcessCommand::StartService {
                    request,
                    flags,
                    start_id,
                    callback,
                } => self.start_service(request, flags, start_id, callback),
                ProcessCommand::StopService { request, callback } => {
                    self.stop_service(request, callback);
                }
                ProcessCommand::BindService {
                    request, callback, ..
                } => self.bind_service(request, callback),
                ProcessCommand::UnbindService { request, callback } => {
                    self.unbind_service(request, callback);
                }
                ProcessCommand::Quit => break,
            }
        }
    }

    async fn create_service(&mut self, request: ServiceRequest, callback: RemoteCallback) {
        let short = request.target.to_short_string();
        match self.loader.load(&request).await {
            Ok(mut service) => {
                let context = ServiceContext::new(request.target.clone(), self.name.clone());
                match run_hook(|| service.on_create(&context)) {
                    HookOutcome::Completed(()) => {
                        self.state
                            .lock_services()
                            .insert(request.target.clone(), HostedService { service, context });
                        callback.send_result(ResultData::ok());
                    }
                    HookOutcome::Failed(error) => {
                        tracing::error!("cannot create service {}: {}", short, error);
                        callback.send_result(ResultData::failure());
                    }
                    HookOutcome::Panicked(message) => self.fatal("create", &short, &message),
                }
            }
            // Broken resolver infrastructure is fatal for the whole process
            Err(Error::SystemFailure(message)) => self.fatal("create", &short, &message),
            Err(error) => {
                tracing::error!("cannot create service {}: {}", short, error);
                callback.send_result(ResultData::failure());
            }
        }
    }

    fn start_service(
        &mut self,
        request: ServiceRequest,
        flags: u32,
        start_id: i32,
        callback: RemoteCallback,
    ) {
        let short = request.target.to_short_string();
        let mut services = self.state.lock_services();
        let outcome = services
            .get_mut(&request.target)
            .map(|hosted| run_hook(|| hosted.service.on_start_command(&request, flags, start_id)));
        drop(services);

        match outcome {
            Some(HookOutcome::Completed(())) => callback.send_result(ResultData::ok()),
            Some(HookOutcome::Failed(error)) => {
                tracing::error!("cannot start service {}: {}", short, error);
                callback.send_result(ResultData::failure());
            }
            Some(HookOutcome::Panicked(message)) => self.fatal("start", &short, &message),
            None => callback.send_result(ResultData::failure()),
        }
    }

    fn stop_service(&mut self, request: ServiceRequest, callback: Option<RemoteCallback>) {
        let short = request.target.to_short_string();
        let mut services = self.state.lock_services();
        let outcome = match services.get_mut(&request.target) {
            Some(hosted) => run_hook(|| hosted.service.on_destroy()),
            None => {
                drop(services);
                if let Some(callback) = callback {
                    callback.send_result(ResultData::failure());
                }
                return;
            }
        };
        if let HookOutcome::Panicked(message) = &outcome {
            drop(services);
            self.fatal("destroy", &short, message);
            return;
        }

        // Removing the entry drops the instance and its context
        services.remove(&request.target);
        drop(services);
        self.state.changed.notify_waiters();

        let success = matches!(outcome, HookOutcome::Completed(()));
        if let HookOutcome::Failed(error) = &outcome {
            tracing::error!("cannot destroy service {}: {}", short, error);
        }
        if let Some(callback) = callback {
            callback.send_result(if success {
                ResultData::ok()
            } else {
                ResultData::failure()
            });
        }
    }

    fn bind_service(&mut self, request: ServiceRequest, callback: RemoteCallback) {
        let short = request.target.to_short_string();
        let mut services = self.state.lock_services();
        let outcome = services
            .get_mut(&request.target)
            .map(|hosted| run_hook(|| hosted.service.on_bind(&request)));
        drop(services);

        match outcome {
            Some(HookOutcome::Completed(handle)) => {
                callback.send_result(ResultData::ok().with_handle(handle));
            }
            Some(HookOutcome::Failed(error)) => {
                tracing::warn!("cannot bind to service {}: {}", short, error);
                callback.send_result(ResultData::failure());
            }
            Some(HookOutcome::Panicked(message)) => self.fatal("bind", &short, &message),
            None => callback.send_result(ResultData::failure()),
        }
    }

    fn unbind_service(&mut self, request: ServiceRequest, callback: Option<RemoteCallback>) {
        let short = request.target.to_short_string();
        let mut services = self.state.lock_services();
        let outcome = services
            .get_mut(&request.target)
            .map(|hosted| run_hook(|| hosted.service.on_unbind(&request)));
        drop(services);

        match outcome {
            Some(HookOutcome::Completed(())) => {
                if let Some(callback) = callback {
                    callback.send_result(ResultData::ok());
                }
            }
            Some(HookOutcome::Failed(error)) => {
                tracing::warn!("cannot unbind from service {}: {}", short, error);
                if let Some(callback) = callback {
                    callback.send_result(ResultData::failure());
                }
            }
            Some(HookOutcome::Panicked(message)) => self.fatal("unbind", &short, &message),
            None => {
                if let Some(callback) = callback {
                    callback.send_result(ResultData::failure());
                }
            }
        }
    }

    /// Fatal-fault path: mark the process failed and wake shutdown waiters.
    /// The caller's callback is deliberately left unanswered — the failure
    /// surfaces to the process owner through the flag.
    fn fatal(&self, operation: &str, target: &str, message: &str) {
        tracing::error!(
            "uncaught fault in process {} while running {} for {}: {}",
            self.name,
            operation,
            target,
            message
        );
        self.state.failed.store(true, Ordering::SeqCst);
        self.state.changed.notify_waiters();
    }
}
