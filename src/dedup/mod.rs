//! Request deduplication.
//!
//! # Data Flow
//! ```text
//! FetchRequest → signature.rs (METHOD + normalized URL + body hash)
//!     → deduplicator.rs
//!         in flight?  attach to the shared handle
//!         cached?     return the cached success
//!         otherwise   start the operation, register it, cache on success
//! ```

pub mod deduplicator;
pub mod signature;

pub use deduplicator::{DedupMetrics, Deduplicator};
pub use signature::RequestSignature;
