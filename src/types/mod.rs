//! Core types for the Corvid kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ServiceTarget, ConnectionId)
//! - **Requests**: Lifecycle request descriptors
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Kernel and observability configuration

mod config;
mod errors;
mod ids;
mod request;

pub use config::{Config, KernelConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{ConnectionId, ServiceTarget};
pub use request::ServiceRequest;
