//! # Response Cache Module
//!
//! Content-addressed storage for response payloads, shared between
//! processes through the filesystem.
//!
//! ```text
//!     cache/
//!     ├── mod.rs      (You are here - Module organization)
//!     ├── config.rs   (Limits, expiration, default dir)
//!     ├── key.rs      (SHA-256 keys and key validation)
//!     └── store.rs    (Entry files, expiry, capacity, stats)
//! ```

mod config;
mod key;
mod store;

/// Cache settings
pub use config::{
    default_cache_dir, CacheConfig, DEFAULT_EXPIRATION, DEFAULT_MAX_ENTRIES,
    DEFAULT_MAX_SIZE_BYTES,
};

/// Key derivation
pub use key::{generate_key, is_valid_key, request_key, validate_key, KEY_LEN};

/// The cache itself
pub use store::{CacheStats, ResponseCache, ENTRY_EXTENSION};
