//! On-disk staging cache for scenes fetched from remote mirrors.
//!
//! Layout: `<root>/<dataset>/<yyyymmdd>/<mirror-hash>/<entry>` plus a
//! `<entry>.manifest.json` sidecar holding the sha256 and size of the file.
//! An entry is present only when its manifest exists and still matches the
//! file. Downloads land in `<file>.partial` and are renamed into place once
//! hashed, so a reader never sees a half-written file.
//!
//! Concurrent requests for the same key are coalesced: the first caller
//! fetches, the others wait on a per-key lock and then find the entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use series_common::TimeStep;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StagingError, StagingResult};

const MANIFEST_SUFFIX: &str = ".manifest.json";
const PARTIAL_SUFFIX: &str = ".partial";

/// Hex characters of the mirror digest used as a directory name.
const MIRROR_HASH_LEN: usize = 12;

/// Identity of one staged file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub dataset: String,
    pub step: TimeStep,
    /// Mirror location the file was fetched from.
    pub mirror: String,
    /// Path of the file relative to the mirror root.
    pub entry: String,
}

impl CacheKey {
    pub fn new(
        dataset: impl Into<String>,
        step: TimeStep,
        mirror: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            step,
            mirror: mirror.into(),
            entry: entry.into(),
        }
    }

    /// The entry as a relative path, keeping its directories.
    ///
    /// Only plain components are accepted so the staged file cannot
    /// escape its mirror directory.
    fn relative_entry(&self) -> StagingResult<PathBuf> {
        let mut relative = PathBuf::new();
        for component in Path::new(&self.entry).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(StagingError::InvalidKey(format!(
                        "entry '{}' must be a relative path without '..'",
                        self.entry
                    )))
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(StagingError::InvalidKey(format!("entry '{}' has no file name", self.entry)));
        }
        Ok(relative)
    }
}

/// Sidecar written next to every staged file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryManifest {
    pub sha256: String,
    pub size: u64,
    pub mirror: String,
    pub entry: String,
    pub fetched_at: DateTime<Utc>,
}

/// Counters of cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingStats {
    pub hits: u64,
    pub misses: u64,
    /// Fetch callbacks actually run.
    pub fetches: u64,
    /// Callers that waited on another caller's fetch.
    pub coalesced: u64,
    pub corruptions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    corruptions: AtomicU64,
}

/// Verified on-disk cache of remote files.
pub struct StagingCache {
    root: PathBuf,
    inflight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl StagingCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inflight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the file for `key` lives once staged.
    pub fn entry_path(&self, key: &CacheKey) -> StagingResult<PathBuf> {
        if key.dataset.is_empty() || key.dataset.contains(['/', '\\']) || key.dataset.starts_with('.') {
            return Err(StagingError::InvalidKey(format!(
                "dataset id '{}' is not usable as a directory name",
                key.dataset
            )));
        }
        Ok(self
            .root
            .join(&key.dataset)
            .join(key.step.label())
            .join(mirror_hash(&key.mirror))
            .join(key.relative_entry()?))
    }

    /// The verified path of `key`, if staged.
    ///
    /// Returns `Ok(None)` when the file or its manifest is missing and
    /// `Err(Corrupt)` when the file no longer matches the manifest.
    pub async fn lookup(&self, key: &CacheKey) -> StagingResult<Option<PathBuf>> {
        let path = self.entry_path(key)?;
        Ok(verify(&path).await?.map(|_| path))
    }

    /// Return the staged file for `key`, running `fetch` to produce it if
    /// it is missing or corrupt.
    ///
    /// `fetch` receives the path of a partial file to write. The partial
    /// file is removed if the fetch fails or `cancel` fires first. At most
    /// one fetch runs per key at a time.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<PathBuf, E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StagingError>,
    {
        let path = self.entry_path(key)?;
        if self.is_staged(&path).await? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(path = %path.display(), "Staging cache hit");
            return Ok(path);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let lock = {
            let mut map = self.inflight.lock().await;
            Arc::clone(map.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let guard = lock.lock().await;

        let result = self.fetch_locked(key, path, cancel, fetch).await;

        {
            let mut map = self.inflight.lock().await;
            if map.get(key).is_some_and(|entry| Arc::strong_count(entry) <= 2) {
                map.remove(key);
            }
        }
        drop(guard);
        result
    }

    async fn fetch_locked<F, Fut, E>(
        &self,
        key: &CacheKey,
        path: PathBuf,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<PathBuf, E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StagingError>,
    {
        if self.is_staged(&path).await? {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }
        if cancel.is_cancelled() {
            return Err(StagingError::Cancelled.into());
        }

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(StagingError::from)?;
        }
        let partial = with_suffix(&path, PARTIAL_SUFFIX);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(E::from(StagingError::Cancelled)),
            result = fetch(partial.clone()) => result,
        };
        if let Err(err) = outcome {
            remove_quietly(&partial).await;
            return Err(err);
        }

        match commit(key, &partial, &path).await {
            Ok(manifest) => {
                info!(
                    dataset = %key.dataset,
                    step = %key.step,
                    path = %path.display(),
                    size = manifest.size,
                    "Staged remote file"
                );
                Ok(path)
            }
            Err(err) => {
                remove_quietly(&partial).await;
                Err(err.into())
            }
        }
    }

    /// Check an entry, discarding it if it is corrupt.
    async fn is_staged(&self, path: &Path) -> StagingResult<bool> {
        match verify(path).await {
            Ok(found) => Ok(found.is_some()),
            Err(StagingError::Corrupt { reason, .. }) => {
                self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), reason = %reason, "Discarding corrupt staging entry");
                discard(path).await?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Remove the file and manifest of `key`, if present.
    pub async fn invalidate(&self, key: &CacheKey) -> StagingResult<()> {
        discard(&self.entry_path(key)?).await
    }

    /// Remove every staged file.
    pub async fn clear(&self) -> StagingResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!(root = %self.root.display(), "Cleared staging cache");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn stats(&self) -> StagingStats {
        StagingStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
        }
    }
}

/// Read the manifest of `path` and check the file against it.
async fn verify(path: &Path) -> StagingResult<Option<EntryManifest>> {
    let manifest_path = with_suffix(path, MANIFEST_SUFFIX);
    let raw = match tokio::fs::read(&manifest_path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let manifest: EntryManifest = serde_json::from_slice(&raw)
        .map_err(|e| StagingError::corrupt(&manifest_path, format!("unreadable manifest: {}", e)))?;

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if metadata.len() != manifest.size {
        return Err(StagingError::corrupt(
            path,
            format!("size {} does not match manifest size {}", metadata.len(), manifest.size),
        ));
    }

    let (sha256, _) = hash_file(path.to_path_buf()).await?;
    if sha256 != manifest.sha256 {
        return Err(StagingError::corrupt(path, "checksum does not match manifest"));
    }
    Ok(Some(manifest))
}

/// Hash the partial file, move it into place and write its manifest.
async fn commit(key: &CacheKey, partial: &Path, path: &Path) -> StagingResult<EntryManifest> {
    let (sha256, size) = hash_file(partial.to_path_buf()).await?;
    let manifest = EntryManifest {
        sha256,
        size,
        mirror: key.mirror.clone(),
        entry: key.entry.clone(),
        fetched_at: Utc::now(),
    };

    tokio::fs::rename(partial, path).await?;

    let manifest_path = with_suffix(path, MANIFEST_SUFFIX);
    let manifest_tmp = with_suffix(&manifest_path, PARTIAL_SUFFIX);
    tokio::fs::write(&manifest_tmp, serde_json::to_vec_pretty(&manifest)?).await?;
    tokio::fs::rename(&manifest_tmp, &manifest_path).await?;
    Ok(manifest)
}

async fn discard(path: &Path) -> StagingResult<()> {
    for target in [with_suffix(path, MANIFEST_SUFFIX), path.to_path_buf()] {
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "Failed to remove partial file");
        }
    }
}

async fn hash_file(path: PathBuf) -> StagingResult<(String, u64)> {
    let hashed = tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))??;
    Ok(hashed)
}

fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn mirror_hash(mirror: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(mirror.as_bytes()));
    digest[..MIRROR_HASH_LEN].to_string()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
