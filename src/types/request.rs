//! Service lifecycle requests.

use serde::{Deserialize, Serialize};

use super::ServiceTarget;

/// A lifecycle request addressed to a service target.
///
/// Extras (`name`, `process`) only apply to system-service requests, where
/// they override the logical service name and the hosting process name. The
/// `system_service` flag is stamped by the `ServiceManagerHandle` entry
/// points and is never set by callers directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub target: ServiceTarget,
    pub system_service: bool,
    pub name: Option<String>,
    pub process: Option<String>,
}

impl ServiceRequest {
    pub fn new(target: ServiceTarget) -> Self {
        Self {
            target,
            system_service: false,
            name: None,
            process: None,
        }
    }

    /// Override the logical service name (system services only).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the hosting process name (system services only).
    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = ServiceRequest::new(ServiceTarget::new("app", "Worker"));
        assert!(!request.system_service);
        assert!(request.name.is_none());
        assert!(request.process.is_none());
    }

    #[test]
    fn test_request_extras() {
        let request = ServiceRequest::new(ServiceTarget::new("app", "Worker"))
            .with_name("worker")
            .with_process("main");
        assert_eq!(request.name.as_deref(), Some("worker"));
        assert_eq!(request.process.as_deref(), Some("main"));
    }
}
