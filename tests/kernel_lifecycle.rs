//! Kernel integration tests — full lifecycle round-trips through the public
//! control-plane API: bootstrap discovery, start/stop/bind/unbind routing,
//! cascaded teardown, and global shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time::{sleep, Duration};

use corvid_core::{
    service_manager_from, ConnectionId, Error, Handle, KernelConfig, PackageResolver,
    RemoteCallback, ResolvedService, Result, Service, ServiceContext, ServiceDirectory,
    ServiceLoader, ServiceManager, ServiceManagerHandle, ServiceRequest, ServiceTarget,
    SERVICE_MANAGER_URI,
};

// =============================================================================
// Test harness
// =============================================================================

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    started: AtomicUsize,
    destroyed: AtomicUsize,
    bound: AtomicUsize,
    unbound: AtomicUsize,
}

/// Small remote-callable interface handed out by `WorkerService::on_bind`.
struct Adder;

impl Adder {
    fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }
}

struct WorkerService {
    counters: Arc<Counters>,
}

impl Service for WorkerService {
    fn on_create(&mut self, _context: &ServiceContext) -> Result<()> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_start_command(
        &mut self,
        _request: &ServiceRequest,
        _flags: u32,
        _start_id: i32,
    ) -> Result<()> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_destroy(&mut self) -> Result<()> {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_bind(&mut self, _request: &ServiceRequest) -> Result<Option<Handle>> {
        self.counters.bound.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Handle::new(Adder)))
    }

    fn on_unbind(&mut self, _request: &ServiceRequest) -> Result<()> {
        self.counters.unbound.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InstalledPackage {
    process_name: String,
    factory: Arc<dyn Fn() -> Result<Box<dyn Service>> + Send + Sync>,
}

/// Resolver over an in-memory table of installed packages.
#[derive(Default)]
struct TableResolver {
    packages: Mutex<HashMap<ServiceTarget, InstalledPackage>>,
}

impl TableResolver {
    fn install(
        &self,
        target: ServiceTarget,
        process_name: &str,
        factory: impl Fn() -> Result<Box<dyn Service>> + Send + Sync + 'static,
    ) {
        self.packages.lock().unwrap().insert(
            target,
            InstalledPackage {
                process_name: process_name.to_string(),
                factory: Arc::new(factory),
            },
        );
    }
}

#[async_trait]
impl PackageResolver for TableResolver {
    async fn resolve_service(&self, request: &ServiceRequest) -> Result<Option<ResolvedService>> {
        let packages = self.packages.lock().unwrap();
        Ok(packages
            .get(&request.target)
            .map(|package| ResolvedService {
                package: request.target.package().to_string(),
                name: request.target.class().to_string(),
                process_name: package.process_name.clone(),
                enabled: true,
                code_path: None,
                libraries: Vec::new(),
            }))
    }

    fn instantiate(&self, descriptor: &ResolvedService) -> Result<Box<dyn Service>> {
        let target = ServiceTarget::new(descriptor.package.clone(), descriptor.name.clone());
        let packages = self.packages.lock().unwrap();
        match packages.get(&target) {
            Some(package) => (package.factory)(),
            None => Err(Error::system_failure(format!(
                "code for {} is missing",
                descriptor.qualified_name()
            ))),
        }
    }
}

struct Kernel {
    manager: ServiceManager,
    handle: ServiceManagerHandle,
    resolver: Arc<TableResolver>,
    loader: Arc<ServiceLoader>,
    directory: ServiceDirectory,
}

fn start_kernel() -> Kernel {
    let resolver = Arc::new(TableResolver::default());
    let loader = Arc::new(ServiceLoader::new(resolver.clone()));
    let directory = ServiceDirectory::new();
    let mut manager = ServiceManager::new(directory.clone(), loader.clone(), KernelConfig::default());
    let handle = manager.start();
    Kernel {
        manager,
        handle,
        resolver,
        loader,
        directory,
    }
}

fn counting_factory(
    counters: &Arc<Counters>,
) -> impl Fn() -> Result<Box<dyn Service>> + Send + Sync + 'static {
    let counters = counters.clone();
    move || {
        Ok(Box::new(WorkerService {
            counters: counters.clone(),
        }) as Box<dyn Service>)
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn logger_system_service_end_to_end() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    let target = ServiceTarget::new("middleware.logging", "LoggerService");
    kernel
        .loader
        .register_system_service(target.clone(), counting_factory(&counters));

    let request = ServiceRequest::new(target.clone()).with_process("main");
    let started = kernel.handle.start_system_service(request.clone());
    assert_eq!(started.get().await.unwrap(), Some(target.clone()));
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);

    let stopped = kernel.handle.stop_system_service(request.clone());
    assert!(stopped.get().await.unwrap());
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);

    // The target is gone from the registry
    let stopped_again = kernel.handle.stop_system_service(request);
    assert!(!stopped_again.get().await.unwrap());

    kernel.manager.shutdown().await;
}

#[tokio::test]
async fn bootstrap_discovery_through_directory() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    let target = ServiceTarget::new("middleware.logging", "LoggerService");
    kernel
        .loader
        .register_system_service(target.clone(), counting_factory(&counters));

    // A late-booting context discovers the manager by waiting on the
    // directory instead of holding a handle from construction time.
    let discovered = {
        let directory = kernel.directory.clone();
        tokio::spawn(async move {
            let handle = directory.wait_for_service(SERVICE_MANAGER_URI).await;
            let manager = handle.downcast::<ServiceManagerHandle>().unwrap();
            (*manager).clone()
        })
        .await
        .unwrap()
    };
    assert!(service_manager_from(&kernel.directory).is_some());

    let started = discovered.start_system_service(ServiceRequest::new(target).with_process("main"));
    assert!(started.get().await.unwrap().is_some());

    kernel.manager.shutdown().await;

    // Shutdown deregistered the handle; shutdown-waiters observe it
    assert!(service_manager_from(&kernel.directory).is_none());
    assert!(
        kernel
            .directory
            .wait_for_shutdown_timeout(SERVICE_MANAGER_URI, Duration::from_millis(100))
            .await
    );
}

#[tokio::test]
async fn bind_exposes_remote_interface() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    let target = ServiceTarget::new("apps.calc", "CalcService");
    kernel
        .resolver
        .install(target.clone(), "calc", counting_factory(&counters));

    let binder: corvid_core::AsyncResult<Option<Handle>> = corvid_core::AsyncResult::new();
    let callback = {
        let binder = binder.clone();
        RemoteCallback::new(move |data| {
            binder.complete(data.handle);
        })
    };

    let connection = ConnectionId::new();
    let bound = kernel.handle.bind_service(
        ServiceRequest::new(target.clone()),
        connection.clone(),
        0,
        callback,
    );
    assert!(bound.get().await.unwrap());

    // The binder handle is usable as the service's interface
    let handle = binder.get().await.unwrap().unwrap();
    let adder = handle.downcast::<Adder>().unwrap();
    assert_eq!(adder.add(20, 22), 42);
    assert_eq!(counters.bound.load(Ordering::SeqCst), 1);

    kernel
        .handle
        .unbind_service(ServiceRequest::new(target), connection, None)
        .unwrap();
    {
        let counters = counters.clone();
        wait_until(move || counters.destroyed.load(Ordering::SeqCst) == 1).await;
    }

    kernel.manager.shutdown().await;
}

#[tokio::test]
async fn stop_refused_while_bound_then_teardown_after_unbind() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    let target = ServiceTarget::new("apps.worker", "WorkerService");
    kernel
        .resolver
        .install(target.clone(), "worker", counting_factory(&counters));

    let connection = ConnectionId::new();
    let bound = kernel.handle.bind_service(
        ServiceRequest::new(target.clone()),
        connection.clone(),
        0,
        RemoteCallback::new(|_| {}),
    );
    assert!(bound.get().await.unwrap());

    // Refuse, do not queue: the stop fails and nothing is torn down
    let stopped = kernel.handle.stop_service(ServiceRequest::new(target.clone()));
    assert!(!stopped.get().await.unwrap());
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 0);

    kernel
        .handle
        .unbind_service(ServiceRequest::new(target.clone()), connection, None)
        .unwrap();
    {
        let counters = counters.clone();
        wait_until(move || counters.destroyed.load(Ordering::SeqCst) == 1).await;
    }
    assert_eq!(counters.unbound.load(Ordering::SeqCst), 1);

    // Gone from the registry now
    let stopped = kernel.handle.stop_service(ServiceRequest::new(target));
    assert!(!stopped.get().await.unwrap());

    kernel.manager.shutdown().await;
}

#[tokio::test]
async fn start_then_stop_leaves_no_state_behind() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    let target = ServiceTarget::new("apps.worker", "WorkerService");
    kernel
        .resolver
        .install(target.clone(), "worker", counting_factory(&counters));

    for round in 1..=3 {
        let started = kernel.handle.start_service(ServiceRequest::new(target.clone()));
        assert_eq!(started.get().await.unwrap(), Some(target.clone()));

        let stopped = kernel.handle.stop_service(ServiceRequest::new(target.clone()));
        assert!(stopped.get().await.unwrap());
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), round);

        // A second stop finds nothing
        let stopped = kernel.handle.stop_service(ServiceRequest::new(target.clone()));
        assert!(!stopped.get().await.unwrap());
    }

    kernel.manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_every_process() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    for (package, class, process) in [
        ("apps.alpha", "AlphaService", "alpha"),
        ("apps.beta", "BetaService", "beta"),
        ("apps.gamma", "GammaService", "alpha"),
    ] {
        kernel.resolver.install(
            ServiceTarget::new(package, class),
            process,
            counting_factory(&counters),
        );
        let started = kernel
            .handle
            .start_service(ServiceRequest::new(ServiceTarget::new(package, class)));
        assert!(started.get().await.unwrap().is_some());
    }
    assert_eq!(counters.created.load(Ordering::SeqCst), 3);

    kernel.manager.shutdown().await;

    // Every hosted service received its destroy hook during shutdown
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 3);

    // The control plane is gone: further calls surface a system failure
    let after = kernel
        .handle
        .start_service(ServiceRequest::new(ServiceTarget::new("apps.alpha", "AlphaService")));
    assert!(matches!(after.get().await, Err(Error::SystemFailure(_))));
}

#[tokio::test]
async fn start_result_supports_continuation_chaining() {
    let mut kernel = start_kernel();
    let counters = Arc::new(Counters::default());
    let target = ServiceTarget::new("apps.worker", "WorkerService");
    kernel
        .resolver
        .install(target.clone(), "worker", counting_factory(&counters));

    let observed = Arc::new(Mutex::new(None));
    let started = kernel.handle.start_service(ServiceRequest::new(target.clone()));
    {
        let observed = observed.clone();
        started.then(move |outcome| {
            *observed.lock().unwrap() = outcome.clone().ok().flatten();
        });
    }

    started.get().await.unwrap();
    assert_eq!(observed.lock().unwrap().clone(), Some(target));

    kernel.manager.shutdown().await;
}
