//! # Rate Limiter Module
//!
//! Cross-process token buckets persisted in small state files.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Configuration, validation, default dirs)
//!     ├── state.rs        (36-byte on-disk record and refill arithmetic)
//!     ├── core.rs         (File-backed token bucket)
//!     ├── manager.rs      (Per-namespace registry)
//!     ├── metrics.rs      (Per-handle counters and health)
//!     └── utils.rs        (Wall clock and file age helpers)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Caller
//!          │
//!          ▼
//!     ┌──────────┐
//!     │ Registry │ ◄── Per-namespace handles
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │   Core   │ ◄── lock → load → refill → take → persist
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │  State   │ ◄── Fixed little-endian record
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │   sync   │ ◄── FileLock + AtomicFileWriter
//!     └──────────┘
//! ```

mod config;
mod core;
mod manager;
mod metrics;
mod state;
mod utils;

/// Configuration types and defaults
pub use config::{default_state_dir, FileRateLimiterConfig, MAX_BURST_SIZE, STATE_FILE_EXTENSION};

/// File-backed token bucket
pub use self::core::{FileRateLimiter, LOCK_FILE_SUFFIX, MAX_ACQUIRE_SLEEP, MIN_ACQUIRE_SLEEP};

/// Namespace registry
pub use manager::{
    validate_namespace, LimiterRegistry, RegistryStats, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_MAX_FILE_AGE, MAX_NAMESPACES, MAX_NAMESPACE_LEN,
};

/// Observability
pub use metrics::{FileLimiterMetrics, HealthStatus};

/// Persisted record format
pub use state::{BucketState, STATE_RECORD_LEN, STATE_VERSION};

/// Time helpers
pub use utils::current_time_ms;
