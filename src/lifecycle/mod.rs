//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build health checker + throttler → Start sweep + janitor
//!
//! Reload (startup.rs):
//!     Watcher delivers config → Reconcile providers → Swap throttler → Swap config
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop sweep (bounded grace) → Stop janitor → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, then background tasks
//! - Sweep shutdown has a deadline: the task is aborted after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{ReloadSummary, Services, StartupError};
