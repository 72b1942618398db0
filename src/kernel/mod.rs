//! Kernel — the control-plane actors.
//!
//! Three actor kinds, each with its own serialized mailbox task:
//! - **Process**: per-context service host and command executor
//! - **ProcessManager**: map of named processes, serialized stop executor
//! - **ServiceManager**: global registry and lifecycle router
//!
//! Everything else in this module (records, supervision) is plain state
//! owned by exactly one of these actors.

mod process;
mod process_manager;
mod service_manager;
mod supervisor;

pub use service_manager::{
    service_manager_from, ServiceManager, ServiceManagerHandle, SERVICE_MANAGER_URI,
};
