//! Typed access to the shared session registry.
//!
//! The registry is both the admin cache and the command mailbox: the
//! submission pipeline writes one [`TrackedUserRecord`] per tracked user,
//! the admin view reads them back and sets per-user stop flags, and the
//! command channel polls those flags. Layout:
//!
//! - `device/user_id` — this device's stable user identifier
//! - `user/<userId>`  — one record, JSON-encoded
//! - `stop/<userId>`  — stop flag, present and `"true"` while a stop is
//!   pending or honored
//!
//! Writers are last-writer-wins per record; the only merge rule is that
//! `sessionStart` is preserved from the first write.

use std::sync::Arc;

use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};
use tracing::warn;

use crate::error::Result;
use crate::session::TrackedUserRecord;
use crate::store::Store;

const DEVICE_USER_KEY: &str = "device/user_id";
const USER_KEY_PREFIX: &str = "user/";
const STOP_KEY_PREFIX: &str = "stop/";
const STOP_FLAG: &str = "true";

/// Length of the random suffix in generated user identifiers.
const USER_ID_SUFFIX_LEN: usize = 5;

/// Typed wrapper over the injected key-value [`Store`].
#[derive(Debug, Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
}

impl Registry {
    /// Create a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Get this device's stable user identifier, generating and persisting
    /// one on first use. Stable across restarts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn device_user_id(&self) -> Result<String> {
        if let Some(existing) = self.store.get(DEVICE_USER_KEY)? {
            return Ok(existing);
        }
        let generated = generate_user_id();
        self.store.set(DEVICE_USER_KEY, &generated)?;
        Ok(generated)
    }

    /// Read the record for one user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the record is
    /// malformed.
    pub fn record(&self, user_id: &str) -> Result<Option<TrackedUserRecord>> {
        let key = user_key(user_id);
        match self.store.get(&key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Merge a record into the registry.
    ///
    /// `sessionStart` is preserved from any existing record; every other
    /// field is last-writer-wins. Returns the record as stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn upsert_record(&self, record: TrackedUserRecord) -> Result<TrackedUserRecord> {
        let existing = self.record(&record.user_id).unwrap_or_else(|err| {
            warn!("discarding unreadable record for {}: {err}", record.user_id);
            None
        });
        let merged = record.preserving_session_start(existing.as_ref());
        let key = user_key(&merged.user_id);
        self.store.set(&key, &serde_json::to_string(&merged)?)?;
        Ok(merged)
    }

    /// Delete the record for one user. Returns `true` if a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn remove_record(&self, user_id: &str) -> Result<bool> {
        self.store.remove(&user_key(user_id))
    }

    /// List all tracked-user records, ordered by user identifier.
    ///
    /// Records that fail to parse are skipped with a warning rather than
    /// failing the whole listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn records(&self) -> Result<Vec<TrackedUserRecord>> {
        let entries = self.store.list(USER_KEY_PREFIX)?;
        let mut records = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_str(&raw) {
                Ok(record) => records.push(record),
                Err(err) => warn!("skipping malformed record at {key}: {err}"),
            }
        }
        Ok(records)
    }

    /// Set the stop flag for a user. Observed by the command channel within
    /// one poll period.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn request_stop(&self, user_id: &str) -> Result<()> {
        self.store.set(&stop_key(user_id), STOP_FLAG)
    }

    /// Check whether a stop is pending (or already honored) for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn stop_requested(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&stop_key(user_id))?
            .is_some_and(|value| value == STOP_FLAG))
    }

    /// Clear the stop flag for a user. Returns `true` if a flag was set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn clear_stop(&self, user_id: &str) -> Result<bool> {
        self.store.remove(&stop_key(user_id))
    }

    /// Delete every record and stop flag. Returns the number of records
    /// removed. The device identity key is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn clear_all(&self) -> Result<usize> {
        let users = self.store.list(USER_KEY_PREFIX)?;
        for (key, _) in &users {
            self.store.remove(key)?;
        }
        for (key, _) in self.store.list(STOP_KEY_PREFIX)? {
            self.store.remove(&key)?;
        }
        Ok(users.len())
    }
}

fn user_key(user_id: &str) -> String {
    format!("{USER_KEY_PREFIX}{user_id}")
}

fn stop_key(user_id: &str) -> String {
    format!("{STOP_KEY_PREFIX}{user_id}")
}

/// Generate a new user identifier, e.g. `USR-LXK3F2M9-A7Q2Z`.
///
/// Base-36 of the current epoch milliseconds plus a short random suffix,
/// uppercased, matching the identifier shape existing deployments persist.
#[must_use]
pub fn generate_user_id() -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis().max(0)).unwrap_or(0);
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(USER_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("USR-{}-{}", to_base36(millis), suffix.to_uppercase())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        let index = usize::try_from(n % 36).unwrap_or(0);
        out.push(DIGITS[index]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Duration, TimeZone};

    fn registry() -> Registry {
        Registry::new(Arc::new(MemoryStore::new()))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn record(user_id: &str, at: DateTime<Utc>) -> TrackedUserRecord {
        TrackedUserRecord {
            user_id: user_id.to_string(),
            last_seen: at,
            location_label: "Lucknow, Uttar Pradesh, India".to_string(),
            coordinates: "26.7795°, 80.9760°".to_string(),
            tracking_duration_seconds: 0,
            is_active: true,
            device_info: "geotrk on linux".to_string(),
            session_start: at,
        }
    }

    #[test]
    fn test_device_user_id_is_stable() {
        let registry = registry();
        let first = registry.device_user_id().unwrap();
        let second = registry.device_user_id().unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("USR-"));
    }

    #[test]
    fn test_generate_user_id_shape() {
        let id = generate_user_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "USR");
        assert_eq!(parts[2].len(), USER_ID_SUFFIX_LEN);
        assert_eq!(id, id.to_uppercase());
    }

    #[test]
    fn test_generate_user_id_unique() {
        let a = generate_user_id();
        let b = generate_user_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(46655), "ZZZ");
    }

    #[test]
    fn test_upsert_and_read_record() {
        let registry = registry();
        let stored = registry.upsert_record(record("USR-1", t0())).unwrap();
        assert_eq!(stored.user_id, "USR-1");

        let read = registry.record("USR-1").unwrap().unwrap();
        assert_eq!(read, stored);
    }

    #[test]
    fn test_upsert_preserves_session_start() {
        let registry = registry();
        registry.upsert_record(record("USR-1", t0())).unwrap();

        let later = t0() + Duration::seconds(600);
        let mut newer = record("USR-1", later);
        newer.tracking_duration_seconds = 600;
        let merged = registry.upsert_record(newer).unwrap();

        assert_eq!(merged.session_start, t0());
        assert_eq!(merged.last_seen, later);
        assert_eq!(merged.tracking_duration_seconds, 600);

        let read = registry.record("USR-1").unwrap().unwrap();
        assert_eq!(read.session_start, t0());
    }

    #[test]
    fn test_remove_record() {
        let registry = registry();
        registry.upsert_record(record("USR-1", t0())).unwrap();

        assert!(registry.remove_record("USR-1").unwrap());
        assert!(registry.record("USR-1").unwrap().is_none());
        assert!(!registry.remove_record("USR-1").unwrap());
    }

    #[test]
    fn test_records_listing() {
        let registry = registry();
        registry.upsert_record(record("USR-1", t0())).unwrap();
        registry.upsert_record(record("USR-2", t0())).unwrap();

        let records = registry.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, "USR-1");
        assert_eq!(records[1].user_id, "USR-2");
    }

    #[test]
    fn test_records_skips_malformed_entries() {
        let store = Arc::new(MemoryStore::new());
        store.set("user/USR-BAD", "not json").unwrap();
        let registry = Registry::new(Arc::clone(&store) as Arc<dyn Store>);
        registry.upsert_record(record("USR-OK", t0())).unwrap();

        let records = registry.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, "USR-OK");
    }

    #[test]
    fn test_stop_flag_lifecycle() {
        let registry = registry();
        assert!(!registry.stop_requested("USR-1").unwrap());

        registry.request_stop("USR-1").unwrap();
        assert!(registry.stop_requested("USR-1").unwrap());

        // Setting again is idempotent.
        registry.request_stop("USR-1").unwrap();
        assert!(registry.stop_requested("USR-1").unwrap());

        assert!(registry.clear_stop("USR-1").unwrap());
        assert!(!registry.stop_requested("USR-1").unwrap());
    }

    #[test]
    fn test_clear_all_keeps_device_identity() {
        let registry = registry();
        let device_id = registry.device_user_id().unwrap();
        registry.upsert_record(record("USR-1", t0())).unwrap();
        registry.upsert_record(record("USR-2", t0())).unwrap();
        registry.request_stop("USR-1").unwrap();

        let removed = registry.clear_all().unwrap();
        assert_eq!(removed, 2);
        assert!(registry.records().unwrap().is_empty());
        assert!(!registry.stop_requested("USR-1").unwrap());
        assert_eq!(registry.device_user_id().unwrap(), device_id);
    }
}
