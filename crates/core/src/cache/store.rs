//! Response cache: canonical lookup, TTL expiry and fill-on-miss.

use std::future::{Future, Ready};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::canonical::canonical_key;
use super::connection::CacheDb;
use super::flight::FlightGroup;
use super::hash::payload_ref;
use super::index::{CacheEntry, ImportSummary, parse_index_line};
use crate::{Error, RemoteFetch};

/// Written into the cache root when this crate creates or claims it.
pub const MARKER_FILE: &str = ".fieldtally-cache";

/// Index database filename inside the cache root.
pub const INDEX_FILE: &str = "index.sqlite";

/// Where the cache lives and which query parameters it ignores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub denylist: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub entries: u64,
    pub in_flight: usize,
}

/// Disk-backed cache of raw remote responses.
///
/// Payloads are files under the cache root; the index maps canonical URLs to
/// them. Construct once per process and share by `Arc`.
pub struct ResponseCache {
    db: CacheDb,
    root: PathBuf,
    resolved_root: PathBuf,
    denylist: Vec<String>,
    fetcher: Arc<dyn RemoteFetch>,
    flights: FlightGroup,
}

impl ResponseCache {
    /// Open (creating if needed) the cache described by `settings`.
    ///
    /// `fetcher` performs the plain retrieval used when a caller supplies no
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the root is unset, cannot be created, or is
    /// a non-empty directory this cache did not create.
    pub async fn open(settings: &CacheSettings, fetcher: Arc<dyn RemoteFetch>) -> Result<Self, Error> {
        prepare_root(&settings.root).await?;
        let db = CacheDb::open(settings.root.join(INDEX_FILE)).await?;
        let resolved_root = tokio::fs::canonicalize(&settings.root)
            .await
            .map_err(|e| Error::Storage(format!("failed to resolve cache root {}: {e}", settings.root.display())))?;

        tracing::info!(root = %settings.root.display(), denylist = ?settings.denylist, "response cache ready");

        Ok(Self {
            db,
            root: settings.root.clone(),
            resolved_root,
            denylist: settings.denylist.clone(),
            fetcher,
            flights: FlightGroup::new(),
        })
    }

    /// Canonical cache key for `url` under this cache's denylist.
    pub fn canonical_key(&self, url: &str) -> Result<String, Error> {
        canonical_key(url, &self.denylist)
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch `url`, serving a fresh cached copy when one exists.
    ///
    /// `ttl_minutes < 0` never expires. Returns `Ok(None)` when the remote
    /// answered with an empty body; nothing is cached in that case. Remote
    /// failures are returned as errors and leave the cache untouched.
    pub async fn fetch(&self, url: &str, ttl_minutes: i64) -> Result<Option<Bytes>, Error> {
        self.fetch_inner(url, ttl_minutes, None::<Ready<Result<Bytes, Error>>>)
            .await
    }

    /// Like [`fetch`](Self::fetch), but a miss is filled by awaiting
    /// `fallback` instead of a plain retrieval.
    ///
    /// `fallback` is only polled on a miss or after expiry.
    pub async fn fetch_with<F>(&self, url: &str, ttl_minutes: i64, fallback: F) -> Result<Option<Bytes>, Error>
    where
        F: Future<Output = Result<Bytes, Error>> + Send,
    {
        self.fetch_inner(url, ttl_minutes, Some(fallback)).await
    }

    async fn fetch_inner<F>(&self, url: &str, ttl_minutes: i64, fallback: Option<F>) -> Result<Option<Bytes>, Error>
    where
        F: Future<Output = Result<Bytes, Error>> + Send,
    {
        let key = self.canonical_key(url)?;
        let _flight = self.flights.acquire(&key).await;

        if let Some(entry) = self.db.get_entry(&key).await? {
            if entry.is_fresh_at(ttl_minutes, Utc::now()) {
                match self.read_payload(&entry.local_ref).await? {
                    Some(payload) => {
                        tracing::debug!(canonical_key = %key, bytes = payload.len(), "cache hit");
                        return Ok(Some(payload));
                    }
                    None => {
                        tracing::warn!(canonical_key = %key, local_ref = %entry.local_ref, "cached payload missing")
                    }
                }
            } else {
                tracing::debug!(canonical_key = %key, created_at = %entry.created_at, ttl_minutes, "cache entry expired");
            }
            self.evict(&entry).await?;
        }

        tracing::debug!(canonical_key = %key, "cache miss");
        let payload = match fallback {
            Some(fallback) => fallback.await?,
            None => self.fetcher.fetch(url).await?,
        };

        if payload.is_empty() {
            tracing::debug!(canonical_key = %key, "empty response not cached");
            return Ok(None);
        }

        self.save(&key, &payload).await?;
        Ok(Some(payload))
    }

    /// Read a payload, treating references that escape the root as missing.
    async fn read_payload(&self, local_ref: &str) -> Result<Option<Bytes>, Error> {
        let Some(path) = payload_path(&self.root, local_ref) else {
            tracing::warn!(local_ref, "payload reference outside cache root");
            return Ok(None);
        };
        let resolved = match tokio::fs::canonicalize(&path).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Storage(format!("failed to resolve cached payload {local_ref}: {e}"))),
        };
        if !resolved.starts_with(&self.resolved_root) {
            tracing::warn!(local_ref, "payload resolves outside cache root");
            return Ok(None);
        }

        match tokio::fs::read(&resolved).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("failed to read cached payload {local_ref}: {e}"))),
        }
    }

    async fn evict(&self, entry: &CacheEntry) -> Result<(), Error> {
        self.db.remove_entry(&entry.canonical_key, &entry.local_ref).await?;
        match payload_path(&self.root, &entry.local_ref) {
            Some(path) => remove_payload(&path).await,
            None => Ok(()),
        }
    }

    async fn save(&self, key: &str, payload: &Bytes) -> Result<(), Error> {
        let generation = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let local_ref = payload_ref(key, generation);
        let final_path = self.root.join(&local_ref);
        let part_path = self.root.join(format!("{local_ref}.{}.part", std::process::id()));

        tokio::fs::write(&part_path, payload)
            .await
            .map_err(|e| Error::Storage(format!("failed to write payload {local_ref}: {e}")))?;
        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| Error::Storage(format!("failed to commit payload {local_ref}: {e}")))?;

        let previous = self.db.get_entry(key).await?;
        self.db
            .insert_entry(&CacheEntry::new(key, local_ref.clone(), payload.len()))
            .await?;

        // Another process filled the same key between our lookup and insert.
        if let Some(previous) = previous
            && previous.local_ref != local_ref
            && let Some(path) = payload_path(&self.root, &previous.local_ref)
        {
            remove_payload(&path).await?;
        }

        tracing::debug!(canonical_key = %key, local_ref = %local_ref, bytes = payload.len(), "cached response");
        Ok(())
    }

    /// Delete every stored payload and reset the index to empty.
    ///
    /// Returns `Ok(false)` without touching anything when the root is unset,
    /// is the working directory, or lacks the marker this cache writes when it
    /// creates its root.
    pub async fn empty_cache(&self) -> Result<bool, Error> {
        if self.root.as_os_str().is_empty() {
            tracing::warn!("refusing to empty cache: root is not set");
            return Ok(false);
        }

        if !tokio::fs::try_exists(self.root.join(MARKER_FILE)).await? {
            tracing::warn!(root = %self.root.display(), "refusing to empty cache: root was not created by fieldtally");
            return Ok(false);
        }

        let resolved = tokio::fs::canonicalize(&self.root).await?;
        if let Ok(cwd) = std::env::current_dir()
            && std::fs::canonicalize(cwd).is_ok_and(|cwd| cwd == resolved)
        {
            tracing::warn!(root = %resolved.display(), "refusing to empty cache: root is the working directory");
            return Ok(false);
        }

        let cleared = self.db.clear_entries().await?;

        let mut removed = 0u64;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let name = name.to_string_lossy();
            if name == MARKER_FILE || name.starts_with(INDEX_FILE) {
                continue;
            }
            if item.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(item.path()).await?;
            } else {
                remove_payload(&item.path()).await?;
            }
            removed += 1;
        }

        tracing::info!(root = %self.root.display(), entries = cleared, files = removed, "cache emptied");
        Ok(true)
    }

    pub async fn stats(&self) -> Result<CacheStats, Error> {
        Ok(CacheStats { entries: self.db.count_entries().await?, in_flight: self.flights.in_flight() })
    }

    /// Import a line-oriented `<url><delimiter><localReference>` index.
    ///
    /// Keys are canonicalized under this cache's denylist. References must be
    /// relative paths inside the root. Blank lines, malformed lines, unparsable
    /// URLs and escaping references are counted as skipped.
    pub async fn import_legacy_index(&self, path: impl AsRef<Path>, delimiter: &str) -> Result<ImportSummary, Error> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;

        let mut summary = ImportSummary::default();
        let mut rows = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let Some((url, local)) = parse_index_line(line, delimiter) else {
                if !line.trim().is_empty() {
                    tracing::warn!(line = number + 1, "skipping malformed index line");
                }
                summary.skipped += 1;
                continue;
            };
            if payload_path(&self.root, local).is_none() {
                tracing::warn!(line = number + 1, local_ref = local, "skipping index line outside cache root");
                summary.skipped += 1;
                continue;
            }
            match self.canonical_key(url) {
                Ok(key) => rows.push((key, local.to_string())),
                Err(e) => {
                    tracing::warn!(line = number + 1, error = %e, "skipping index line with unparsable url");
                    summary.skipped += 1;
                }
            }
        }

        summary.imported = self.db.import_entries(rows).await?;
        tracing::info!(imported = summary.imported, skipped = summary.skipped, "legacy index imported");
        Ok(summary)
    }
}

/// Join a payload reference onto `root`.
///
/// Only plain relative references are accepted: absolute paths, `..` and
/// `.` components yield `None`.
fn payload_path(root: &Path, local_ref: &str) -> Option<PathBuf> {
    let relative = Path::new(local_ref);
    let mut components = relative.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_))) { Some(root.join(relative)) } else { None }
}

async fn remove_payload(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Storage(format!("failed to remove {}: {e}", path.display()))),
    }
}

/// Create the cache root, or claim it if it exists and is empty.
async fn prepare_root(root: &Path) -> Result<(), Error> {
    if root.as_os_str().is_empty() {
        return Err(Error::Storage("cache root is not set".into()));
    }

    let marker = root.join(MARKER_FILE);
    if tokio::fs::try_exists(&marker).await? {
        return Ok(());
    }

    if tokio::fs::try_exists(root).await? {
        let mut dir = tokio::fs::read_dir(root).await?;
        if dir.next_entry().await?.is_some() {
            return Err(Error::Storage(format!(
                "{} exists and was not created as a fieldtally cache",
                root.display()
            )));
        }
    } else {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| Error::Storage(format!("failed to create cache root {}: {e}", root.display())))?;
    }

    tokio::fs::write(&marker, b"fieldtally response cache\n").await?;
    Ok(())
}
