//! Disk-backed cache for resolved notes and profiles.
//!
//! One small sqlite key/value table in the data directory, split into a
//! `note-cache:` and a `profile-cache:` namespace plus a version marker.
//!
//! # Cache invalidation
//! Both namespaces are purged before first use when `CACHE_VERSION`
//! differs from the stored marker, so entries written by an incompatible
//! release never surface. Eviction is coarse: a full store clears both
//! namespaces rather than dropping individual entries.
//!
//! # Degraded mode
//! The store is probed once at open with a write/delete round-trip. If the
//! probe (or the open itself) fails, the cache runs disabled: reads return
//! nothing, writes report failure, and the engine stays network-only.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{Note, Profile};

/// Bump whenever the serialized shape of cached notes or profiles changes.
pub const CACHE_VERSION: &str = "1";

const VERSION_KEY: &str = "cache-version";
const NOTE_PREFIX: &str = "note-cache:";
const PROFILE_PREFIX: &str = "profile-cache:";
const PROBE_KEY: &str = "cache-probe";

/// Cache key for a resolved note.
pub fn note_key(event_id: &str) -> String {
    format!("{NOTE_PREFIX}{event_id}")
}

/// Cache key for an author profile.
pub fn profile_key(pubkey: &str) -> String {
    format!("{PROFILE_PREFIX}{pubkey}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub note_count: usize,
    pub profile_count: usize,
}

pub struct PersistentCache {
    conn: Option<Mutex<Connection>>,
}

impl PersistentCache {
    /// Open the cache under `data_dir`.
    ///
    /// Never fails: a store that cannot be opened or probed yields a
    /// disabled cache.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Self {
        match Self::try_open(data_dir.as_ref()) {
            Ok(conn) => {
                let cache = Self {
                    conn: Some(Mutex::new(conn)),
                };
                cache.migrate_version();
                cache
            }
            Err(e) => {
                tracing::warn!("cache unavailable, running network-only: {e}");
                Self { conn: None }
            }
        }
    }

    /// A cache that ignores every operation.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    fn try_open(data_dir: &Path) -> anyhow::Result<Connection> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("note_cache.db"))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        // Availability probe: a store that cannot take this round-trip is
        // treated as absent entirely.
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            (PROBE_KEY, "probe"),
        )?;
        conn.execute("DELETE FROM kv WHERE key = ?1", (PROBE_KEY,))?;

        Ok(conn)
    }

    /// Purge both namespaces when the stored marker does not match
    /// `CACHE_VERSION`, then rewrite the marker. Runs before any other
    /// access; a same-version reopen touches nothing.
    fn migrate_version(&self) {
        let stored = self.get(VERSION_KEY);
        if stored.as_deref() != Some(CACHE_VERSION) {
            tracing::info!(
                stored = stored.as_deref().unwrap_or("none"),
                current = CACHE_VERSION,
                "cache version mismatch, purging"
            );
            self.clear_namespaces();
            self.set(VERSION_KEY, CACHE_VERSION);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let conn = self.conn.as_ref()?.lock().ok()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", (key,), |row| {
            row.get(0)
        })
        .ok()
    }

    /// Store a value, reporting success.
    ///
    /// A full store triggers one escalation: clear both namespaces and
    /// retry the single write; failure is reported only if the retry also
    /// fails. Any other write error is reported without retry.
    pub fn set(&self, key: &str, value: &str) -> bool {
        let Some(conn) = self.conn.as_ref() else {
            return false;
        };
        let Ok(conn) = conn.lock() else {
            return false;
        };

        match Self::put(&conn, key, value) {
            Ok(()) => true,
            Err(e) if is_quota_error(&e) => {
                tracing::warn!("cache store full, clearing cached entries and retrying");
                if let Err(e) = Self::purge(&conn) {
                    tracing::warn!("cache purge failed: {e}");
                }
                match Self::put(&conn, key, value) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(key, "cache write failed even after purge: {e}");
                        false
                    }
                }
            }
            Err(e) => {
                tracing::warn!(key, "cache write failed: {e}");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let Ok(conn) = conn.lock() else {
            return;
        };
        if let Err(e) = conn.execute("DELETE FROM kv WHERE key = ?1", (key,)) {
            tracing::warn!(key, "cache remove failed: {e}");
        }
    }

    /// Drop every cached note and profile. The version marker stays.
    pub fn clear_namespaces(&self) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let Ok(conn) = conn.lock() else {
            return;
        };
        if let Err(e) = Self::purge(&conn) {
            tracing::warn!("cache clear failed: {e}");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let Some(conn) = self.conn.as_ref() else {
            return CacheStats::default();
        };
        let Ok(conn) = conn.lock() else {
            return CacheStats::default();
        };

        CacheStats {
            note_count: Self::count_prefix(&conn, NOTE_PREFIX),
            profile_count: Self::count_prefix(&conn, PROFILE_PREFIX),
        }
    }

    pub fn get_note(&self, event_id: &str) -> Option<Note> {
        self.get_json(&note_key(event_id))
    }

    pub fn put_note(&self, note: &Note) -> bool {
        self.put_json(&note_key(&note.id), note)
    }

    pub fn get_profile(&self, pubkey: &str) -> Option<Profile> {
        self.get_json(&profile_key(pubkey))
    }

    pub fn put_profile(&self, pubkey: &str, profile: &Profile) -> bool {
        self.put_json(&profile_key(pubkey), profile)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, "discarding undecodable cache entry: {e}");
                self.remove(key);
                None
            }
        }
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw),
            Err(e) => {
                tracing::warn!(key, "failed to encode cache value: {e}");
                false
            }
        }
    }

    fn put(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            (key, value),
        )?;
        Ok(())
    }

    fn purge(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM kv WHERE key LIKE ?1 OR key LIKE ?2",
            (format!("{NOTE_PREFIX}%"), format!("{PROFILE_PREFIX}%")),
        )?;
        Ok(())
    }

    fn count_prefix(conn: &Connection, prefix: &str) -> usize {
        conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE key LIKE ?1",
            (format!("{prefix}%"),),
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as usize)
        .unwrap_or(0)
    }
}

fn is_quota_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::DiskFull
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_note() -> Note {
        Note {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            content: "cached note".to_string(),
            created_at: 1_700_000_000,
            author_name: Some("alice".to_string()),
            author_picture: None,
        }
    }

    #[test]
    fn test_note_round_trip() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::open(dir.path());

        let note = sample_note();
        assert!(cache.put_note(&note));
        assert_eq!(cache.get_note(&note.id), Some(note));
    }

    #[test]
    fn test_profile_round_trip() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::open(dir.path());

        let profile = Profile {
            name: Some("bob".to_string()),
            picture: Some("https://a.example/b.png".to_string()),
        };
        assert!(cache.put_profile("b-pubkey", &profile));
        assert_eq!(cache.get_profile("b-pubkey"), Some(profile));
    }

    #[test]
    fn test_entries_survive_same_version_reopen() {
        let dir = tempdir().unwrap();
        let note = sample_note();
        {
            let cache = PersistentCache::open(dir.path());
            cache.put_note(&note);
        }

        let cache = PersistentCache::open(dir.path());
        assert_eq!(cache.get_note(&note.id), Some(note));
        assert_eq!(cache.stats().note_count, 1);
    }

    #[test]
    fn test_version_mismatch_purges_everything() {
        let dir = tempdir().unwrap();
        let note = sample_note();
        {
            let cache = PersistentCache::open(dir.path());
            cache.put_note(&note);
            cache.put_profile("p", &Profile::default());
            // Pretend an older release wrote these entries.
            cache.set(VERSION_KEY, "0");
        }

        let cache = PersistentCache::open(dir.path());
        assert!(cache.get_note(&note.id).is_none());
        assert_eq!(cache.stats(), CacheStats::default());
        assert_eq!(cache.get(VERSION_KEY).as_deref(), Some(CACHE_VERSION));
    }

    #[test]
    fn test_stats_split_by_namespace() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::open(dir.path());

        cache.put_note(&sample_note());
        cache.put_profile("p1", &Profile::default());
        cache.put_profile("p2", &Profile::default());

        let stats = cache.stats();
        assert_eq!(stats.note_count, 1);
        assert_eq!(stats.profile_count, 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::open(dir.path());
        let note = sample_note();

        cache.put_note(&note);
        cache.remove(&note_key(&note.id));
        assert!(cache.get_note(&note.id).is_none());

        cache.put_note(&note);
        cache.put_profile("p", &Profile::default());
        cache.clear_namespaces();
        assert_eq!(cache.stats(), CacheStats::default());
        // The marker is not part of the cached namespaces.
        assert_eq!(cache.get(VERSION_KEY).as_deref(), Some(CACHE_VERSION));
    }

    #[test]
    fn test_disabled_cache_is_all_no_ops() {
        let cache = PersistentCache::disabled();
        assert!(!cache.set("k", "v"));
        assert!(cache.get("k").is_none());
        assert!(!cache.put_note(&sample_note()));
        assert!(cache.get_note(&sample_note().id).is_none());
        cache.remove("k");
        cache.clear_namespaces();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_undecodable_entry_reads_as_absent() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::open(dir.path());

        let id = "c".repeat(64);
        cache.set(&note_key(&id), "{definitely not a note");
        assert!(cache.get_note(&id).is_none());
        // The broken entry is dropped rather than left to fail every read.
        assert!(cache.get(&note_key(&id)).is_none());
    }
}
