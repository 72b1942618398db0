//! Service resolution and instantiation.
//!
//! Two sources of service implementations:
//!   - **System services**: trusted factories registered in-process at
//!     bootstrap, keyed by target
//!   - **Ordinary services**: resolved through the external
//!     [`PackageResolver`] collaborator, which locates the declaring
//!     package and instantiates the implementation from its code locations

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Service;
use crate::types::{Error, Result, ServiceRequest, ServiceTarget};

/// A resolved service descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedService {
    /// Declaring package.
    pub package: String,
    /// Implementation name within the package.
    pub name: String,
    /// Name of the process the service runs in.
    pub process_name: String,
    /// Disabled services resolve but must not be instantiated.
    pub enabled: bool,
    /// Package code location, if any.
    pub code_path: Option<String>,
    /// Additional library locations.
    pub libraries: Vec<String>,
}

impl ResolvedService {
    /// Fully qualified implementation name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.package, self.name)
    }
}

/// External package-resolution collaborator.
///
/// `resolve_service` locates the descriptor for a request (`None` = not
/// found, a policy failure); `instantiate` loads the implementation from
/// the descriptor's code locations. Errors from either are system failures
/// unless they are explicit policy failures.
#[async_trait]
pub trait PackageResolver: Send + Sync {
    async fn resolve_service(&self, request: &ServiceRequest) -> Result<Option<ResolvedService>>;

    fn instantiate(&self, descriptor: &ResolvedService) -> Result<Box<dyn Service>>;
}

type SystemServiceFactory = Box<dyn Fn() -> Result<Box<dyn Service>> + Send + Sync>;

/// Service implementation source shared by every process.
///
/// Holds the trusted system-service factory registry and the package
/// resolver for everything else.
pub struct ServiceLoader {
    system_factories: Mutex<HashMap<ServiceTarget, SystemServiceFactory>>,
    resolver: Arc<dyn PackageResolver>,
}

impl ServiceLoader {
    pub fn new(resolver: Arc<dyn PackageResolver>) -> Self {
        Self {
            system_factories: Mutex::new(HashMap::new()),
            resolver,
        }
    }

    /// Register a trusted in-process factory for a system service target.
    /// Returns false if the target already has a factory.
    pub fn register_system_service(
        &self,
        target: ServiceTarget,
        factory: impl Fn() -> Result<Box<dyn Service>> + Send + Sync + 'static,
    ) -> bool {
        let mut factories = self.lock_factories();
        if factories.contains_key(&target) {
            return false;
        }
        factories.insert(target, Box::new(factory));
        true
    }

    /// Resolve a request to a descriptor without instantiating.
    ///
    /// System-service requests synthesize the descriptor from the request
    /// extras; ordinary requests go through the resolver. `None` is a policy
    /// failure, `Err` a system failure.
    pub(crate) async fn resolve_target(
        &self,
        request: &ServiceRequest,
    ) -> Result<Option<ResolvedService>> {
        if request.system_service {
            let process_name = request
                .process
                .clone()
                .unwrap_or_else(|| request.target.package().to_string());
            return Ok(Some(ResolvedService {
                package: request.target.package().to_string(),
                name: request.target.class().to_string(),
                process_name,
                enabled: true,
                code_path: None,
                libraries: Vec::new(),
            }));
        }
        self.resolver.resolve_service(request).await
    }

    /// Resolve and instantiate the implementation for a request.
    pub(crate) async fn load(&self, request: &ServiceRequest) -> Result<Box<dyn Service>> {
        if request.system_service {
            let factories = self.lock_factories();
            return match factories.get(&request.target) {
                Some(factory) => factory(),
                None => Err(Error::not_found(format!(
                    "unknown system service {}",
                    request.target.to_short_string()
                ))),
            };
        }

        let descriptor = self
            .resolver
            .resolve_service(request)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "unknown service {}",
                    request.target.to_short_string()
                ))
            })?;

        if !descriptor.enabled {
            return Err(Error::not_enabled(format!(
                "service not enabled {}",
                request.target.to_short_string()
            )));
        }

        self.resolver.instantiate(&descriptor)
    }

    fn lock_factories(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ServiceTarget, SystemServiceFactory>> {
        self.system_factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ServiceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.lock_factories().len();
        f.debug_struct("ServiceLoader")
            .field("system_factories", &count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopService;
    impl Service for NoopService {}

    /// Resolver with no installed packages.
    struct EmptyResolver;

    #[async_trait]
    impl PackageResolver for EmptyResolver {
        async fn resolve_service(
            &self,
            _request: &ServiceRequest,
        ) -> Result<Option<ResolvedService>> {
            Ok(None)
        }

        fn instantiate(&self, descriptor: &ResolvedService) -> Result<Box<dyn Service>> {
            Err(Error::not_found(descriptor.qualified_name()))
        }
    }

    fn loader() -> ServiceLoader {
        ServiceLoader::new(Arc::new(EmptyResolver))
    }

    #[tokio::test]
    async fn test_system_service_factory_lookup() {
        let loader = loader();
        let target = ServiceTarget::new("middleware.logging", "LoggerService");
        assert!(loader
            .register_system_service(target.clone(), || Ok(Box::new(NoopService))));
        // Duplicate registration is rejected
        assert!(!loader
            .register_system_service(target.clone(), || Ok(Box::new(NoopService))));

        let mut request = ServiceRequest::new(target);
        request.system_service = true;
        assert!(loader.load(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_system_service_is_not_found() {
        let loader = loader();
        let mut request = ServiceRequest::new(ServiceTarget::new("app", "Ghost"));
        request.system_service = true;

        assert!(matches!(
            loader.load(&request).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_ordinary_service_is_not_found() {
        let loader = loader();
        let request = ServiceRequest::new(ServiceTarget::new("app", "Worker"));

        assert!(matches!(
            loader.load(&request).await,
            Err(Error::NotFound(_))
        ));
        assert!(loader.resolve_target(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_system_target_synthesized_from_extras() {
        let loader = loader();
        let mut request = ServiceRequest::new(ServiceTarget::new("middleware.logging", "LoggerService"))
            .with_process("main");
        request.system_service = true;

        let descriptor = loader.resolve_target(&request).await.unwrap().unwrap();
        assert_eq!(descriptor.process_name, "main");
        assert_eq!(descriptor.package, "middleware.logging");
        assert_eq!(descriptor.name, "LoggerService");
        assert!(descriptor.enabled);
    }

    #[tokio::test]
    async fn test_system_process_defaults_to_package() {
        let loader = loader();
        let mut request = ServiceRequest::new(ServiceTarget::new("middleware.logging", "LoggerService"));
        request.system_service = true;

        let descriptor = loader.resolve_target(&request).await.unwrap().unwrap();
        assert_eq!(descriptor.process_name, "middleware.logging");
    }
}
