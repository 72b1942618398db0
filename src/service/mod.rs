//! Hosted service contracts.
//!
//! A service is a named unit of long-lived behavior with
//! create/start/stop/bind/unbind lifecycle hooks, hosted inside exactly one
//! process. The kernel only manages when and where a service runs — the
//! hooks are where its behavior lives.

mod loader;

pub use loader::{PackageResolver, ResolvedService, ServiceLoader};

use crate::registry::Handle;
use crate::types::{Result, ServiceRequest, ServiceTarget};

/// Lifecycle hooks implemented by hosted service code.
///
/// Every hook runs on the hosting process's own command executor, one
/// command at a time. A hook returning an error is an operational fault:
/// it is logged and reported to the caller but does not affect the hosting
/// process. A hook that panics marks the whole process as failed.
pub trait Service: Send {
    /// Called once after the instance is attached to its context.
    fn on_create(&mut self, _context: &ServiceContext) -> Result<()> {
        Ok(())
    }

    /// Called for each start command delivered to the service.
    fn on_start_command(
        &mut self,
        _request: &ServiceRequest,
        _flags: u32,
        _start_id: i32,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once before the instance is removed from its process.
    fn on_destroy(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when a caller binds; the returned handle is delivered to the
    /// binder.
    fn on_bind(&mut self, _request: &ServiceRequest) -> Result<Option<Handle>> {
        Ok(None)
    }

    /// Called when a caller unbinds.
    fn on_unbind(&mut self, _request: &ServiceRequest) -> Result<()> {
        Ok(())
    }
}

/// Per-service context, attached at creation and released at stop.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    target: ServiceTarget,
    process_name: String,
}

impl ServiceContext {
    pub(crate) fn new(target: ServiceTarget, process_name: String) -> Self {
        Self {
            target,
            process_name,
        }
    }

    pub fn target(&self) -> &ServiceTarget {
        &self.target
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }
}
