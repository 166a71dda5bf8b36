//! Rate-limited warnings for Prepare-time fallbacks.
//!
//! A model with many layers hits the same fallback once per layer; only the
//! first occurrence of a key is logged at WARN, the rest at DEBUG.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

static WARN_REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashSet<String>> {
    WARN_REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Record `key`, returning true the first time it is seen.
fn first_occurrence(key: &str) -> bool {
    // A poisoned lock still holds a usable set.
    let mut seen = match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    seen.insert(key.to_string())
}

/// Log `message` at WARN the first time `key` is seen, at DEBUG afterwards.
pub fn warn_once_fn(key: &str, message: &str) {
    if first_occurrence(key) {
        tracing::warn!(key = %key, "{}", message);
    } else {
        tracing::debug!(key = %key, "(rate-limited) {}", message);
    }
}

/// `format!`-style front end for [`warn_once_fn`].
#[macro_export]
macro_rules! warn_once {
    ($key:expr, $($arg:tt)*) => {
        $crate::warn_once_fn($key, &format!($($arg)*))
    };
}
