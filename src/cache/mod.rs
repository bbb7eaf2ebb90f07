//! Cache module for storing metric values on disk
//!
//! This module provides a cache manager that persists Analytics results keyed
//! by request fingerprint, with a TTL per entry. Expired entries stay on disk
//! until overwritten or purged, so callers can fall back to stale values when
//! the API is unavailable.

mod manager;

pub use manager::{CacheError, CacheManager};
