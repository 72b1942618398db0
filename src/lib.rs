//! # Corvid Core - Component Service Kernel
//!
//! Rust implementation of the Corvid middleware control plane providing:
//! - Isolated execution contexts ("processes") with serialized command mailboxes
//! - Named service lifecycle management (create/start/stop/bind/unbind)
//! - Location-transparent routing of lifecycle commands between contexts
//! - One-shot async results with timeout, cancellation, and continuations
//! - A process-wide service directory for bootstrap discovery
//!
//! ## Architecture
//!
//! Every actor owns its state and consumes an ordered command mailbox:
//! ```text
//!   caller ──request──▶ ┌────────────────────┐
//!                       │   ServiceManager   │  records, routing
//!                       │  ┌──────────────┐  │
//!                       │  │ProcessManager│  │  named process map
//!                       │  └──────┬───────┘  │
//!                       └─────────┼──────────┘
//!                     ┌───────────┼───────────┐
//!                ┌────▼───┐  ┌────▼───┐  ┌────▼───┐
//!                │Process │  │Process │  │Process │   one mailbox task
//!                │ "main" │  │ "calc" │  │  ...   │   per process
//!                └────────┘  └────────┘  └────────┘
//! ```
//!
//! Replies travel back through `RemoteCallback` handles and settle the
//! caller's `AsyncResult`.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod concurrent;
pub mod kernel;
pub mod registry;
pub mod service;
pub mod types;

// Internal utilities
pub mod observability;

pub use concurrent::{AsyncResult, RemoteCallback, ResultData};
pub use kernel::{service_manager_from, ServiceManager, ServiceManagerHandle, SERVICE_MANAGER_URI};
pub use registry::{Handle, ServiceDirectory};
pub use service::{PackageResolver, ResolvedService, Service, ServiceContext, ServiceLoader};
pub use types::{
    Config, ConnectionId, Error, KernelConfig, Result, ServiceRequest, ServiceTarget,
};
