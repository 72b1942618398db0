//! Service manager — global registry and lifecycle router.
//!
//! The service manager is the top-level actor: it maps service targets to
//! service records and process records, routes lifecycle requests to the
//! owning process's mailbox, tracks binding reference counts, and decides
//! when a service or process is no longer needed.
//!
//! All routing and record state lives on the manager's own mailbox task, so
//! no fine-grained locking is needed for it; the only shared state is the
//! process-record map (read by the shutdown path) and the service
//! directory (shared process-wide).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::process::ProcessHandle;
use super::process_manager::ProcessManager;
use crate::concurrent::{AsyncResult, RemoteCallback};
use crate::registry::{Handle, ServiceDirectory};
use crate::service::ServiceLoader;
use crate::types::{ConnectionId, Error, KernelConfig, Result, ServiceRequest, ServiceTarget};

/// Directory name under which the service manager registers its handle.
pub const SERVICE_MANAGER_URI: &str = "corvid://service_manager";

/// Look up the service manager's command interface in a directory.
pub fn service_manager_from(directory: &ServiceDirectory) -> Option<ServiceManagerHandle> {
    directory
        .get(SERVICE_MANAGER_URI)
        .and_then(|handle| handle.downcast::<ServiceManagerHandle>())
        .map(|handle| (*handle).clone())
}

// =============================================================================
// Records
// =============================================================================

/// Registry state for one live service.
#[derive(Debug)]
struct ServiceRecord {
    /// Logical service name (diagnostics).
    name: String,
    process_name: String,
    #[allow(dead_code)]
    system_service: bool,
    alive: bool,
    running: bool,
    connections: Vec<ConnectionId>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Registry state for one live process.
#[derive(Debug)]
struct ProcessRecord {
    name: String,
    handle: ProcessHandle,
    services: HashSet<ServiceTarget>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

type ProcessRecords = Arc<Mutex<HashMap<String, ProcessRecord>>>;

// =============================================================================
// Commands and handle
// =============================================================================

#[derive(Debug)]
enum ManagerCommand {
    StartService {
        request: ServiceRequest,
        promise: AsyncResult<Option<ServiceTarget>>,
    },
    StopService {
        request: ServiceRequest,
        promise: AsyncResult<bool>,
    },
    BindService {
        request: ServiceRequest,
        connection: ConnectionId,
        flags: u32,
        callback: RemoteCallback,
        promise: AsyncResult<bool>,
    },
    UnbindService {
        request: ServiceRequest,
        connection: ConnectionId,
        callback: Option<RemoteCallback>,
    },
    /// Re-entry from a create callback: creation failed, clean up.
    CreateFailed { request: ServiceRequest },
    Quit,
}

/// Location-transparent command interface to the service manager.
///
/// Entry points stamp the system-service flag so hosted code cannot forge
/// it, and return the AsyncResult the actor will settle.
#[derive(Debug, Clone)]
pub struct ServiceManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl ServiceManagerHandle {
    /// Start an ordinary service. Completes with the resolved target, or
    /// `None` when the target could not be resolved/prepared.
    pub fn start_service(&self, mut request: ServiceRequest) -> AsyncResult<Option<ServiceTarget>> {
        request.system_service = false;
        self.enqueue_start(request)
    }

    /// Start a system service; name/process extras default to the target's
    /// class and package.
    pub fn start_system_service(
        &self,
        mut request: ServiceRequest,
    ) -> AsyncResult<Option<ServiceTarget>> {
        if request.name.is_none() {
            request.name = Some(request.target.class().to_string());
        }
        if request.process.is_none() {
            request.process = Some(request.target.package().to_string());
        }
        request.system_service = true;
        self.enqueue_start(request)
    }

    /// Stop a service. Completes `false` for unknown/not-alive targets and
    /// for targets with active bindings.
    pub fn stop_service(&self, request: ServiceRequest) -> AsyncResult<bool> {
        let promise = AsyncResult::new();
        self.send(
            ManagerCommand::StopService {
                request,
                promise: promise.clone(),
            },
            &promise,
        );
        promise
    }

    /// Stop a system service.
    pub fn stop_system_service(&self, mut request: ServiceRequest) -> AsyncResult<bool> {
        request.system_service = true;
        self.stop_service(request)
    }

    /// Bind a connection to a service. `callback` receives the bind result
    /// (including the bound handle); the returned result completes `true`
    /// when the target resolved, whether or not this call added a new
    /// connection.
    pub fn bind_service(
        &self,
        mut request: ServiceRequest,
        connection: ConnectionId,
        flags: u32,
        callback: RemoteCallback,
    ) -> AsyncResult<bool> {
        request.system_service = false;
        let promise = AsyncResult::new();
        self.send(
            ManagerCommand::BindService {
                request,
                connection,
                flags,
                callback,
                promise: promise.clone(),
            },
            &promise,
        );
        promise
    }

    /// Unbind a connection. When the last connection goes, the service is
    /// stopped automatically.
    pub fn unbind_service(
        &self,
        request: ServiceRequest,
        connection: ConnectionId,
        callback: Option<RemoteCallback>,
    ) -> Result<()> {
        self.tx
            .send(ManagerCommand::UnbindService {
                request,
                connection,
                callback,
            })
            .map_err(|_| Error::system_failure("service manager is not running"))
    }

    fn enqueue_start(&self, request: ServiceRequest) -> AsyncResult<Option<ServiceTarget>> {
        let promise = AsyncResult::new();
        self.send(
            ManagerCommand::StartService {
                request,
                promise: promise.clone(),
            },
            &promise,
        );
        promise
    }

    fn send<T: Clone + Send + 'static>(&self, command: ManagerCommand, promise: &AsyncResult<T>) {
        if self.tx.send(command).is_err() {
            promise.fail(Error::system_failure("service manager is not running"));
        }
    }
}

// =============================================================================
// ServiceManager
// =============================================================================

/// The top-level control plane object.
///
/// `start` spawns the routing actor and registers its handle in the
/// directory; `shutdown` stops every process, deregisters, and joins
/// everything. Construction takes explicit handles to all process-wide
/// collaborators — there are no ambient singletons.
#[derive(Debug)]
pub struct ServiceManager {
    config: KernelConfig,
    directory: ServiceDirectory,
    loader: Arc<ServiceLoader>,
    process_manager: Arc<ProcessManager>,
    processes: ProcessRecords,
    tx: Option<mpsc::UnboundedSender<ManagerCommand>>,
    task: Option<JoinHandle<()>>,
    registered: Option<Handle>,
}

impl ServiceManager {
    pub fn new(
        directory: ServiceDirectory,
        loader: Arc<ServiceLoader>,
        config: KernelConfig,
    ) -> Self {
        let process_manager = Arc::new(ProcessManager::new(loader.clone(), config.clone()));
        Self {
            config,
            directory,
            loader,
            process_manager,
            processes: Arc::new(Mutex::new(HashMap::new())),
            tx: None,
            task: None,
            registered: None,
        }
    }

    /// Start the process manager and the routing actor; register the
    /// manager's handle in the service directory.
    pub fn start(&mut self) -> ServiceManagerHandle {
        self.process_manager.start();

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ManagerWorker {
            loader: self.loader.clone(),
            process_manager: self.process_manager.clone(),
            processes: self.processes.clone(),
            services: HashMap::new(),
            tx: tx.clone(),
            next_start_id: 0,
        };
        self.task = Some(tokio::spawn(worker.run(rx)));
        self.tx = Some(tx.clone());

        let handle = ServiceManagerHandle { tx };
        let registered = Handle::new(handle.clone());
        self.directory.add(SERVICE_MANAGER_URI, registered.clone());
        self.registered = Some(registered);
        handle
    }

    /// Global shutdown: stop every known process (best-effort, bounded by
    /// the configured shutdown timeout), deregister from the directory,
    /// quit the routing actor, and shut down the process manager.
    pub async fn shutdown(&mut self) {
        let names: Vec<String> = {
            let processes = self.lock_processes();
            processes.keys().cloned().collect()
        };
        for name in names {
            let stopped = self
                .process_manager
                .stop_process_timeout(&name, self.config.shutdown_timeout);
            // Cancellation/timeout/fault are swallowed: shutdown proceeds
            let _ = stopped.get().await;
        }
        self.lock_processes().clear();

        if let Some(registered) = self.registered.take() {
            self.directory.remove(&registered);
        }

        if let Some(tx) = self.tx.take() {
            let _ = tx.send(ManagerCommand::Quit);
        }
        if let Some(task) = self.task.take() {
            tracing::debug!("shutting down service manager");
            let _ = task.await;
            tracing::debug!("service manager has been shut down");
        }

        self.process_manager.shutdown().await;
    }

    /// Diagnostic lookup: name of the process with the given id.
    pub fn process_name(&self, pid: u64) -> Option<String> {
        self.process_manager.process_name(pid)
    }

    fn lock_processes(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessRecord>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Routing actor
// =============================================================================

struct ManagerWorker {
    loader: Arc<ServiceLoader>,
    process_manager: Arc<ProcessManager>,
    processes: ProcessRecords,
    services: HashMap<ServiceTarget, ServiceRecord>,
    /// Self-handle for callback re-entry.
    tx: mpsc::UnboundedSender<ManagerCommand>,
    next_start_id: i32,
}

impl ManagerWorker {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<ManagerCommand>) {
        while let Some(command) = mailbox.recv().await {
            match command {
                ManagerCommand::StartService { request, promise } => {
                    self.start_service(request, promise).await;
                }
                ManagerCommand::StopService { request, promise } => {
                    self.stop_service(request, promise);
                }
                ManagerCommand::BindService {
                    request,
                    connection,
                    flags,
                    callback,
                    promise,
                } => {
                    self.bind_service(request, connection, flags, callback, promise)
                        .await;
                }
                ManagerCommand::UnbindService {
                    request,
                    connection,
                    callback,
                } => self.unbind_service(request, connection, callback),
                ManagerCommand::CreateFailed { request } => {
                    self.cleanup_service(&request.target);
                }
                ManagerCommand::Quit => break,
            }
        }
    }

    /// Resolve the request, obtain the owning process, and make sure the
    /// service record exists and the service is being created. Idempotent
    /// for already-alive services. Ok(false) = unresolvable (policy).
    async fn prepare_service(&mut self, request: &ServiceRequest) -> Result<bool> {
        let target = request.target.clone();
        let descriptor = match self.loader.resolve_target(request).await? {
            Some(descriptor) => descriptor,
            None => return Ok(false),
        };

        if !self.services.contains_key(&target) {
            self.prepare_process(&descriptor.process_name);
            let name = if request.system_service {
                request
                    .name
                    .clone()
                    .unwrap_or_else(|| target.class().to_string())
            } else {
                descriptor.qualified_name()
            };
            self.services.insert(
                target.clone(),
                ServiceRecord {
                    name,
                    process_name: descriptor.process_name.clone(),
                    system_service: request.system_service,
                    alive: false,
                    running: false,
                    connections: Vec::new(),
                    created_at: Utc::now(),
                },
            );
            let mut processes = self.lock_processes();
            if let Some(record) = processes.get_mut(&descriptor.process_name) {
                record.services.insert(target.clone());
            }
        }

        // Mark the record alive before the create command is dispatched so
        // the mailbox observes the flag in order.
        let creation = match self.services.get_mut(&target) {
            Some(record) if !record.alive => {
                record.alive = true;
                Some((record.name.clone(), record.process_name.clone()))
            }
            Some(_) => None,
            None => return Ok(false),
        };
        if let Some((service_name, process_name)) = creation {
            let handle = self.process_handle(&process_name)?;

            let reenter = self.tx.clone();
            let failed_request = request.clone();
            let callback = RemoteCallback::new(move |data| {
                if data.success {
                    tracing::debug!(
                        "service {} has been created in process {}",
                        service_name,
                        process_name
                    );
                } else {
                    tracing::warn!(
                        "service {} cannot be created in process {}, cleaning up",
                        service_name,
                        process_name
                    );
                    let _ = reenter.send(ManagerCommand::CreateFailed {
                        request: failed_request,
                    });
                }
            });
            handle.create_service(request.clone(), callback)?;
        }

        Ok(true)
    }

    async fn start_service(
        &mut self,
        request: ServiceRequest,
        promise: AsyncResult<Option<ServiceTarget>>,
    ) {
        match self.prepare_service(&request).await {
            Err(error) => {
                tracing::error!(
                    "cannot start service {}: {}",
                    request.target.to_short_string(),
                    error
                );
                promise.fail(error);
            }
            Ok(false) => {
                promise.complete(None);
            }
            Ok(true) => {
                let target = request.target.clone();
                let (service_name, process_name) = match self.services.get_mut(&target) {
                    Some(record) => {
                        record.running = true;
                        (record.name.clone(), record.process_name.clone())
                    }
                    None => {
                        promise.complete(None);
                        return;
                    }
                };

                let handle = match self.process_handle(&process_name) {
                    Ok(handle) => handle,
                    Err(error) => {
                        promise.fail(error);
                        return;
                    }
                };

                let start_id = self.next_start_id;
                self.next_start_id += 1;

                let completer = promise.clone();
                let callback = RemoteCallback::new(move |data| {
                    if data.success {
                        tracing::debug!(
                            "service {} has been started in process {}",
                            service_name,
                            process_name
                        );
                    } else {
                        tracing::warn!(
                            "service {} cannot be started in process {}",
                            service_name,
                            process_name
                        );
                    }
                    completer.complete(Some(target.clone()));
                });
                if let Err(error) = handle.start_service(request, 0, start_id, callback) {
                    promise.fail(error);
                }
            }
        }
    }

    fn stop_service(&mut self, request: ServiceRequest, promise: AsyncResult<bool>) {
        let target = request.target.clone();
        let record = match self.services.get(&target) {
            Some(record) => record,
            None => {
                tracing::debug!(
                    "cannot find and stop service {}",
                    target.to_short_string()
                );
                promise.complete(false);
                return;
            }
        };

        if !record.alive {
            promise.complete(false);
            return;
        }
        if !record.connections.is_empty() {
            tracing::debug!(
                "cannot stop service {} due to active bindings",
                target.to_short_string()
            );
            promise.complete(false);
            return;
        }

        let service_name = record.name.clone();
        let process_name = record.process_name.clone();
        let handle = match self.process_handle(&process_name) {
            Ok(handle) => handle,
            Err(error) => {
                promise.fail(error);
                return;
            }
        };

        let completer = promise.clone();
        let callback = RemoteCallback::new(move |data| {
            if data.success {
                tracing::debug!("service {} has been stopped", service_name);
            } else {
                tracing::warn!("service {} cannot be stopped", service_name);
            }
            completer.complete(data.success);
        });
        if let Err(error) = handle.stop_service(request, Some(callback)) {
            promise.fail(error);
            return;
        }

        // The record goes unconditionally; the promise reports what the
        // process said about the destroy hook.
        if let Some(mut record) = self.services.remove(&target) {
            record.alive = false;
            record.running = false;
        }
        self.detach_from_process(&process_name, &target);
    }

    async fn bind_service(
        &mut self,
        request: ServiceRequest,
        connection: ConnectionId,
        flags: u32,
        callback: RemoteCallback,
        promise: AsyncResult<bool>,
    ) {
        match self.prepare_service(&request).await {
            Err(error) => {
                tracing::error!(
                    "cannot bind service {}: {}",
                    request.target.to_short_string(),
                    error
                );
                promise.fail(error);
            }
            Ok(false) => {
                tracing::debug!(
                    "cannot find and bind service {}",
                    request.target.to_short_string()
                );
                promise.complete(false);
            }
            Ok(true) => {
                let target = request.target.clone();
                // None = the connection is already bound (idempotent add)
                let added = match self.services.get_mut(&target) {
                    Some(record) => {
                        if record.connections.contains(&connection) {
                            None
                        } else {
                            record.connections.push(connection.clone());
                            Some((record.name.clone(), record.process_name.clone()))
                        }
                    }
                    None => {
                        promise.complete(false);
                        return;
                    }
                };
                if let Some((service_name, process_name)) = added {
                    let handle = match self.process_handle(&process_name) {
                        Ok(handle) => handle,
                        Err(error) => {
                            promise.fail(error);
                            return;
                        }
                    };
                    if let Err(error) = handle.bind_service(request, connection, flags, callback) {
                        promise.fail(error);
                        return;
                    }
                    tracing::debug!(
                        "bound to service {} in process {}",
                        service_name,
                        process_name
                    );
                }
                promise.complete(true);
            }
        }
    }

    fn unbind_service(
        &mut self,
        request: ServiceRequest,
        connection: ConnectionId,
        callback: Option<RemoteCallback>,
    ) {
        let target = request.target.clone();
        let (service_name, process_name) = match self.services.get(&target) {
            Some(record) => (record.name.clone(), record.process_name.clone()),
            None => return,
        };

        let handle = match self.process_handle(&process_name) {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(
                    "cannot unbind service {}: {}",
                    target.to_short_string(),
                    error
                );
                return;
            }
        };
        if let Err(error) = handle.unbind_service(request.clone(), callback) {
            tracing::error!(
                "cannot unbind service {}: {}",
                target.to_short_string(),
                error
            );
            return;
        }
        tracing::debug!(
            "unbound from service {} in process {}",
            service_name,
            process_name
        );

        let drained = match self.services.get_mut(&target) {
            Some(record) => {
                record.connections.retain(|c| c != &connection);
                record.connections.is_empty()
            }
            None => false,
        };
        if drained {
            // No bindings left: tear the service down via the regular stop
            // path.
            let _ = self.tx.send(ManagerCommand::StopService {
                request,
                promise: AsyncResult::new(),
            });
        }
    }

    /// Remove a half-created service after its create command failed.
    fn cleanup_service(&mut self, target: &ServiceTarget) -> bool {
        match self.services.remove(target) {
            Some(mut record) => {
                if record.alive {
                    record.alive = false;
                }
                if record.running {
                    record.running = false;
                }
                self.detach_from_process(&record.process_name, target);
                true
            }
            None => {
                tracing::debug!(
                    "cannot find and clean up service {}",
                    target.to_short_string()
                );
                false
            }
        }
    }

    /// Get or create the process record (and the process itself) for `name`.
    fn prepare_process(&mut self, name: &str) -> ProcessHandle {
        let mut processes = self.lock_processes();
        if let Some(record) = processes.get(name) {
            return record.handle.clone();
        }
        let handle = self.process_manager.start_process(name);
        processes.insert(
            name.to_string(),
            ProcessRecord {
                name: name.to_string(),
                handle: handle.clone(),
                services: HashSet::new(),
                created_at: Utc::now(),
            },
        );
        handle
    }

    /// Drop `target` from its process record; when the record empties, the
    /// process stop cascades.
    fn detach_from_process(&mut self, process_name: &str, target: &ServiceTarget) {
        let removed = {
            let mut processes = self.lock_processes();
            let emptied = match processes.get_mut(process_name) {
                Some(record) => {
                    record.services.remove(target);
                    record.services.is_empty()
                }
                None => false,
            };
            if emptied {
                processes.remove(process_name)
            } else {
                None
            }
        };
        if let Some(record) = removed {
            self.process_manager.stop_process(&record.name);
        }
    }

    fn process_handle(&self, name: &str) -> Result<ProcessHandle> {
        self.lock_processes()
            .get(name)
            .map(|record| record.handle.clone())
            .ok_or_else(|| Error::system_failure(format!("no record for process {}", name)))
    }

    fn lock_processes(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessRecord>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Tests
// =============================================================================
