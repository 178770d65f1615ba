//! Connection admission subsystem.
//!
//! # Data Flow
//! ```text
//! request(priority)
//!     → connection_pool.rs (free slot? admit : enqueue)
//!     → queue.rs (priority tiers, FIFO within a tier)
//!     → slot released on settle → next waiter admitted
//! ```
//!
//! # Design Decisions
//! - A slot is held by an RAII guard, so release never depends on the outcome
//! - Released slots are handed straight to the next waiter instead of going
//!   back to the free count, so late arrivals cannot jump the queue

pub mod connection_pool;
pub mod queue;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use connection_pool::{ConnectionPool, PoolMetrics, SlotGuard};

/// Admission priority. Higher priorities are admitted first when saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}
