//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Orchestrator::shutdown()
//!     → pool: reject queued waiters, refuse new admissions
//!     → dedup: trigger Shutdown, in-flight operations resolve with an error
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
