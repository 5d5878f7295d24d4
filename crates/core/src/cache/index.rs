//! Cache index operations.
//!
//! Maps canonical keys to locally stored payloads. Each entry records its own
//! creation time so expiry never depends on filesystem metadata.

use super::connection::CacheDb;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// One cached response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub canonical_key: String,
    pub local_ref: String,
    pub created_at: String,
    pub byte_len: i64,
}

impl CacheEntry {
    pub fn new(canonical_key: impl Into<String>, local_ref: impl Into<String>, byte_len: usize) -> Self {
        Self {
            canonical_key: canonical_key.into(),
            local_ref: local_ref.into(),
            created_at: Utc::now().to_rfc3339(),
            byte_len: byte_len as i64,
        }
    }

    /// Whether the entry is still usable at `now` under a TTL in minutes.
    ///
    /// Negative TTLs never expire. An unparsable timestamp counts as expired.
    pub fn is_fresh_at(&self, ttl_minutes: i64, now: DateTime<Utc>) -> bool {
        if ttl_minutes < 0 {
            return true;
        }
        match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(created) => now.signed_duration_since(created.with_timezone(&Utc)) <= chrono::Duration::minutes(ttl_minutes),
            Err(_) => false,
        }
    }
}

/// Outcome of importing a line-oriented index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ImportSummary {
    pub imported: u64,
    pub skipped: u64,
}

/// Parse one `<canonicalURL><delimiter><localReference>` line.
///
/// Blank and malformed lines yield `None`.
pub fn parse_index_line<'a>(line: &'a str, delimiter: &str) -> Option<(&'a str, &'a str)> {
    if delimiter.is_empty() {
        return None;
    }
    let (key, local) = line.split_once(delimiter)?;
    let (key, local) = (key.trim(), local.trim());
    if key.is_empty() || local.is_empty() {
        return None;
    }
    Some((key, local))
}

impl CacheDb {
    /// Insert or replace the entry for a canonical key.
    pub async fn insert_entry(&self, entry: &CacheEntry) -> Result<(), Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (canonical_key, local_ref, created_at, byte_len)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(canonical_key) DO UPDATE SET
                        local_ref = excluded.local_ref,
                        created_at = excluded.created_at,
                        byte_len = excluded.byte_len",
                    params![entry.canonical_key, entry.local_ref, entry.created_at, entry.byte_len],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Point lookup by canonical key.
    pub async fn get_entry(&self, canonical_key: &str) -> Result<Option<CacheEntry>, Error> {
        let canonical_key = canonical_key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT canonical_key, local_ref, created_at, byte_len
                    FROM cache_entries WHERE canonical_key = ?1",
                )?;

                let result = stmt.query_row(params![canonical_key], |row| {
                    Ok(CacheEntry {
                        canonical_key: row.get(0)?,
                        local_ref: row.get(1)?,
                        created_at: row.get(2)?,
                        byte_len: row.get(3)?,
                    })
                });

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Remove an entry only if it still points at `local_ref`.
    ///
    /// Returns whether a row was deleted. A concurrent writer that already
    /// replaced the entry is left untouched.
    pub async fn remove_entry(&self, canonical_key: &str, local_ref: &str) -> Result<bool, Error> {
        let canonical_key = canonical_key.to_string();
        let local_ref = local_ref.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE canonical_key = ?1 AND local_ref = ?2",
                    params![canonical_key, local_ref],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry. Returns the number of deleted rows.
    pub async fn clear_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Insert imported `(canonical_key, local_ref)` rows in one transaction.
    ///
    /// Rows are stamped with the import time. Keys already present are left
    /// alone, so the first occurrence wins. Returns the number of rows added.
    pub async fn import_entries(&self, rows: Vec<(String, String)>) -> Result<u64, Error> {
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut imported = 0u64;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO cache_entries (canonical_key, local_ref, created_at, byte_len)
                        VALUES (?1, ?2, ?3, 0)",
                    )?;
                    for (key, local) in &rows {
                        imported += stmt.execute(params![key, local, created_at])? as u64;
                    }
                }
                tx.commit()?;
                Ok(imported)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::payload_ref;

    fn make_entry(key: &str) -> CacheEntry {
        CacheEntry::new(key, payload_ref(key, 1), 42)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("https://example.com/?q=1");

        db.insert_entry(&entry).await.unwrap();

        let retrieved = db.get_entry(&entry.canonical_key).await.unwrap().unwrap();
        assert_eq!(retrieved, entry);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_entry("https://nowhere/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_same_key_keeps_single_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.insert_entry(&make_entry("https://example.com/")).await.unwrap();
        db.insert_entry(&make_entry("https://example.com/")).await.unwrap();
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_requires_matching_ref() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("https://example.com/");
        db.insert_entry(&entry).await.unwrap();

        assert!(!db.remove_entry(&entry.canonical_key, "someone-else").await.unwrap());
        assert!(db.remove_entry(&entry.canonical_key, &entry.local_ref).await.unwrap());
        assert!(db.get_entry(&entry.canonical_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_entries() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.insert_entry(&make_entry("https://a/")).await.unwrap();
        db.insert_entry(&make_entry("https://b/")).await.unwrap();

        assert_eq!(db.clear_entries().await.unwrap(), 2);
        assert_eq!(db.count_entries().await.unwrap(), 0);
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let mut entry = make_entry("https://example.com/");
        entry.created_at = (now - chrono::Duration::minutes(10)).to_rfc3339();

        assert!(entry.is_fresh_at(15, now));
        assert!(entry.is_fresh_at(10, now));
        assert!(!entry.is_fresh_at(9, now));
        assert!(entry.is_fresh_at(-1, now));
    }

    #[test]
    fn test_garbled_timestamp_is_expired() {
        let mut entry = make_entry("https://example.com/");
        entry.created_at = "yesterday".into();
        assert!(!entry.is_fresh_at(60, Utc::now()));
        assert!(entry.is_fresh_at(-1, Utc::now()));
    }

    #[test]
    fn test_parse_index_line() {
        assert_eq!(parse_index_line("https://x/?a=1 => cache/3\n", " => "), Some(("https://x/?a=1", "cache/3")));
        assert_eq!(parse_index_line("", " => "), None);
        assert_eq!(parse_index_line("no delimiter here", " => "), None);
        assert_eq!(parse_index_line(" => cache/3", " => "), None);
    }

    #[tokio::test]
    async fn test_import_entries_first_wins() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let rows = vec![
            ("https://x/?a=1".to_string(), "cache/1".to_string()),
            ("https://x/?a=2".to_string(), "cache/2".to_string()),
            ("https://x/?a=1".to_string(), "cache/9".to_string()),
        ];

        assert_eq!(db.import_entries(rows).await.unwrap(), 2);
        let first = db.get_entry("https://x/?a=1").await.unwrap().unwrap();
        assert_eq!(first.local_ref, "cache/1");
    }
}
