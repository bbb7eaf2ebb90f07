//! Cache manager for persisting metric responses to disk
//!
//! Provides a `CacheManager` that stores one JSON document per request
//! fingerprint, with an expiry timestamp, so that stale values remain
//! available when the Analytics API cannot be reached.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::{MetricRequest, MetricValue};

/// Extension used for cache documents
const ENTRY_EXTENSION: &str = "json";

/// Latest expiry ever written; four-digit years keep the timestamp parseable
fn latest_expiry() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now + ttl_seconds`, clamped to [`latest_expiry`] on the high side and
/// to `now` when a negative TTL underflows
fn expiry_after(now: DateTime<Utc>, ttl_seconds: i64) -> DateTime<Utc> {
    let latest = latest_expiry();
    match TimeDelta::try_seconds(ttl_seconds).and_then(|ttl| now.checked_add_signed(ttl)) {
        Some(at) => at.min(latest),
        None if ttl_seconds < 0 => now,
        None => latest,
    }
}

/// Errors that can occur when writing to the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Directory creation, file write or directory listing failed
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The entry could not be serialized
    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The temporary file could not be moved over the entry
    #[error("failed to persist cache entry: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// One persisted row: the cached value and its freshness window
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// The cached metric value
    value: MetricValue,
    /// When the value was cached
    cached_at: DateTime<Utc>,
    /// After this instant the entry is only served by fallback lookups
    expires_at: DateTime<Utc>,
}

/// Manages reading and writing cached metric values on disk
///
/// Entries live in an XDG-compliant cache directory (`~/.cache/gametrics/`
/// on Linux) as `<fingerprint>.json`. Every call round-trips to disk; there
/// is no in-memory layer.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl CacheManager {
    /// Creates a new CacheManager using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "gametrics")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a new CacheManager with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Directory holding the cache documents
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to the cache file for the given request
    fn entry_path(&self, request: &MetricRequest) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", request.fingerprint(), ENTRY_EXTENSION))
    }

    fn read_entry(path: &Path) -> Option<CacheEntry> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache entry");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Looks up the cached value for a request
    ///
    /// # Arguments
    /// * `request` - The request whose fingerprint is looked up
    /// * `ignore_expiration` - When true, expired entries are returned as well
    ///
    /// # Returns
    /// * `Some(MetricValue)` if a matching entry exists (and is fresh, unless ignoring expiration)
    /// * `None` if no entry exists, it cannot be parsed, or it has expired
    pub fn get(&self, request: &MetricRequest, ignore_expiration: bool) -> Option<MetricValue> {
        let entry = Self::read_entry(&self.entry_path(request))?;

        if !ignore_expiration && Utc::now() >= entry.expires_at {
            return None;
        }

        Some(entry.value)
    }

    /// Stores a value for a request, replacing any previous entry
    ///
    /// The entry expires `ttl_seconds` from now; zero or negative TTLs
    /// produce an entry that is already expired, and TTLs past the end of
    /// year 9999 are clamped to it. The document is written to
    /// a temporary file in the cache directory and renamed over the target,
    /// so concurrent writers for one fingerprint leave exactly one complete
    /// entry (the last rename wins).
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(CacheError)` if the directory, file, or rename fails
    pub fn set(
        &self,
        request: &MetricRequest,
        value: &MetricValue,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir)?;

        let now = Utc::now();
        let entry = CacheEntry {
            value: value.clone(),
            cached_at: now,
            expires_at: expiry_after(now, ttl_seconds),
        };
        let json = serde_json::to_string_pretty(&entry)?;

        let mut tmp = NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(self.entry_path(request))?;

        debug!(
            fingerprint = %request.fingerprint(),
            expires_at = %entry.expires_at,
            "Cached metric value"
        );
        Ok(())
    }

    /// Removes every expired entry, returning how many were deleted
    ///
    /// Lookups never delete anything; this is the only eviction path.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut removed = 0;
        for item in dir {
            let path = item?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(entry) = Self::read_entry(&path) {
                if now >= entry.expires_at {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }

        debug!(removed, "Purged expired cache entries");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_cache() -> (CacheManager, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = CacheManager::with_dir(temp_dir.path().to_path_buf());
        (cache, temp_dir)
    }

    fn request(metric: &str) -> MetricRequest {
        MetricRequest::new("12345", "2005-01-01", "today", metric)
    }

    fn entry_count(dir: &Path) -> usize {
        fs::read_dir(dir)
            .expect("Should list cache directory")
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().map_or(false, |ext| ext == "json"))
                    .unwrap_or(false)
            })
            .count()
    }

    #[test]
    fn test_set_creates_file_named_by_fingerprint() {
        let (cache, temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("42"), 3600)
            .expect("Write should succeed");

        let expected_path = temp_dir.path().join(format!("{}.json", req.fingerprint()));
        assert!(expected_path.exists(), "Cache file should exist");

        let content = fs::read_to_string(&expected_path).expect("Should read file");
        assert!(content.contains("\"value\""));
        assert!(content.contains("\"42\""));
        assert!(content.contains("\"expires_at\""));
    }

    #[test]
    fn test_get_returns_none_for_missing_request() {
        let (cache, _temp_dir) = create_test_cache();

        assert!(cache.get(&request("pageviews"), false).is_none());
        assert!(cache.get(&request("pageviews"), true).is_none());
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("1234"), 3600)
            .expect("Write should succeed");

        assert_eq!(cache.get(&req, false), Some(MetricValue::from("1234")));
    }

    #[test]
    fn test_zero_value_is_found() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("0"), 3600)
            .expect("Write should succeed");

        assert_eq!(cache.get(&req, false), Some(MetricValue::from("0")));
    }

    #[test]
    fn test_expired_entry_only_visible_when_ignoring_expiration() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("77"), 0)
            .expect("Write should succeed");

        assert!(cache.get(&req, false).is_none(), "Zero TTL should be expired");
        assert_eq!(cache.get(&req, true), Some(MetricValue::from("77")));
    }

    #[test]
    fn test_negative_ttl_is_expired() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("5"), -60)
            .expect("Write should succeed");

        assert!(cache.get(&req, false).is_none());
        assert_eq!(cache.get(&req, true), Some(MetricValue::from("5")));
    }

    #[test]
    fn test_upsert_keeps_single_entry_with_latest_value() {
        let (cache, temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("1"), 3600)
            .expect("First write should succeed");
        cache
            .set(&req, &MetricValue::from("2"), 3600)
            .expect("Second write should succeed");

        assert_eq!(entry_count(temp_dir.path()), 1);
        assert_eq!(cache.get(&req, false), Some(MetricValue::from("2")));
    }

    #[test]
    fn test_huge_ttl_is_clamped_instead_of_overflowing() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("1"), i64::MAX / 2000)
            .expect("Write should succeed");

        assert_eq!(cache.get(&req, false), Some(MetricValue::from("1")));
        let entry = CacheManager::read_entry(&cache.entry_path(&req)).expect("Entry should parse");
        assert_eq!(entry.expires_at, latest_expiry());
    }

    #[test]
    fn test_huge_negative_ttl_is_expired() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache
            .set(&req, &MetricValue::from("1"), i64::MIN)
            .expect("Write should succeed");

        assert!(cache.get(&req, false).is_none());
        assert_eq!(cache.get(&req, true), Some(MetricValue::from("1")));
    }

    #[test]
    fn test_concurrent_writers_leave_one_complete_entry() {
        let (cache, temp_dir) = create_test_cache();
        let req = request("pageviews");
        let written: Vec<String> = (0..8).map(|i| format!("value-{}", i)).collect();

        std::thread::scope(|scope| {
            for value in &written {
                let cache = cache.clone();
                let req = req.clone();
                scope.spawn(move || {
                    for _ in 0..20 {
                        cache
                            .set(&req, &MetricValue::from(value.as_str()), 3600)
                            .expect("Concurrent write should succeed");
                    }
                });
            }
        });

        assert_eq!(entry_count(temp_dir.path()), 1);
        let stored = cache.get(&req, false).expect("Entry should parse");
        assert!(
            written.iter().any(|v| v == stored.as_str()),
            "Stored value {:?} should be one of the written values",
            stored
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_is_treated_as_missing() {
        use std::os::unix::fs::PermissionsExt;

        let (cache, temp_dir) = create_test_cache();
        let req = request("pageviews");
        cache.set(&req, &MetricValue::from("1"), 3600).unwrap();
        let path = temp_dir.path().join(format!("{}.json", req.fingerprint()));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores file modes; only assert when the read really fails
        if fs::read_to_string(&path).is_err() {
            assert!(cache.get(&req, true).is_none());
        }
    }

    #[test]
    fn test_fresh_write_replaces_expired_entry() {
        let (cache, _temp_dir) = create_test_cache();
        let req = request("pageviews");

        cache.set(&req, &MetricValue::from("old"), 0).unwrap();
        cache.set(&req, &MetricValue::from("new"), 3600).unwrap();

        assert_eq!(cache.get(&req, false), Some(MetricValue::from("new")));
    }

    #[test]
    fn test_requests_do_not_share_entries() {
        let (cache, _temp_dir) = create_test_cache();

        cache
            .set(&request("pageviews"), &MetricValue::from("10"), 3600)
            .unwrap();

        assert!(cache.get(&request("sessions"), true).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_treated_as_missing() {
        let (cache, temp_dir) = create_test_cache();
        let req = request("pageviews");
        fs::write(
            temp_dir.path().join(format!("{}.json", req.fingerprint())),
            "not json",
        )
        .unwrap();

        assert!(cache.get(&req, true).is_none());
    }

    #[test]
    fn test_set_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("cache");
        let cache = CacheManager::with_dir(nested_path.clone());

        cache
            .set(&request("pageviews"), &MetricValue::from("1"), 3600)
            .expect("Write should succeed");

        assert!(nested_path.exists(), "Nested directory should be created");
    }

    #[test]
    fn test_set_fails_loudly_when_directory_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "file").unwrap();
        let cache = CacheManager::with_dir(blocker);

        let result = cache.set(&request("pageviews"), &MetricValue::from("1"), 3600);

        assert!(matches!(result, Err(CacheError::Io(_))));
    }

    #[test]
    fn test_purge_removes_only_expired_entries() {
        let (cache, temp_dir) = create_test_cache();
        cache
            .set(&request("pageviews"), &MetricValue::from("1"), 0)
            .unwrap();
        cache
            .set(&request("sessions"), &MetricValue::from("2"), 3600)
            .unwrap();

        let removed = cache.purge_expired().expect("Purge should succeed");

        assert_eq!(removed, 1);
        assert_eq!(entry_count(temp_dir.path()), 1);
        assert!(cache.get(&request("sessions"), false).is_some());
        assert!(cache.get(&request("pageviews"), true).is_none());
    }

    #[test]
    fn test_purge_on_missing_directory_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheManager::with_dir(temp_dir.path().join("absent"));

        assert_eq!(cache.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(cache) = CacheManager::new() {
            let path_str = cache.dir().to_string_lossy();
            assert!(
                path_str.contains("gametrics"),
                "Cache path should contain project name"
            );
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }
}
