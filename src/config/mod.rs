//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → FETCH_* environment overrides
//!     → validation.rs (semantic checks)
//!     → FetchConfig (validated, immutable)
//!     → handed to the Orchestrator at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the pipeline never re-reads it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    CircuitBreakerConfig, DedupConfig, DeadlineConfig, EndpointKey, ExpiryPolicy, FetchConfig,
    LogFormat, ObservabilityConfig, PoolConfig, Profile, RetryConfig, TransportConfig,
};
pub use validation::{validate_config, ValidationError};
