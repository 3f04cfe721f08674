//! Content-derived cache keys.
//!
//! A key is the lowercase hex SHA-256 of the request parts. Each part is
//! prefixed with its length so that `["a|b", "c"]` and `["a", "b|c"]` hash
//! differently.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Length of a key in characters.
pub const KEY_LEN: usize = 64;

/// Hashes `parts` into a 64-character lowercase hex key.
///
/// ```rust
/// use durable_rater::generate_key;
///
/// let key = generate_key(&["What is Rust?", "gpt-4", "You are terse."]);
/// assert_eq!(key.len(), 64);
/// assert_eq!(key, generate_key(&["What is Rust?", "gpt-4", "You are terse."]));
/// assert_ne!(key, generate_key(&["What is Rust?", "gpt-4", ""]));
/// ```
pub fn generate_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Key for a chat-style request.
pub fn request_key(prompt: &str, model: &str, system_prompt: &str) -> String {
    generate_key(&[prompt, model, system_prompt])
}

/// Returns `true` for exactly 64 lowercase hex characters.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Rejects anything that [`is_valid_key`] does not accept.
pub fn validate_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(Error::InvalidKey(format!(
            "cache key must be {} lowercase hex characters, got {:?}",
            KEY_LEN,
            key.chars().take(80).collect::<String>()
        )))
    }
}
