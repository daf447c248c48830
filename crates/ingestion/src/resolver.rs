//! Finding the scenes of a dataset for one time step.
//!
//! For each candidate file the dataset's mirrors are tried in declared
//! order. Local mirrors are read in place. Remote mirrors go through the
//! manifest (when the dataset has one), then the staging cache, which
//! downloads on a miss. A failure on one mirror falls through to the next.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use series_common::TimeStep;
use storage::{CacheKey, StagingCache};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::list_available;
use crate::dataset::{Candidate, DatasetBinding, Mirror, MirrorLocation};
use crate::error::{FetchError, IngestionError, Result};
use crate::fetch::{join_url, RemoteFetcher};

/// A raster file holding data of one dataset for one native step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub dataset_id: String,
    pub native_step: TimeStep,
    pub tile: Option<String>,
    /// Local path (in a local mirror or the staging cache).
    pub path: PathBuf,
    /// Mirror the scene came from.
    pub mirror: String,
}

/// Outcome of resolving a dataset for a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Scenes in preference order.
    Found(Vec<Scene>),
    /// Nothing usable; one reason per failed attempt.
    NotFound { attempts: Vec<String> },
}

/// Files advertised by a remote manifest.
#[derive(Debug, Default)]
struct Advertised {
    urls: Vec<String>,
}

impl Advertised {
    /// The advertised URL ending in `entry` at a path boundary.
    fn find(&self, entry: &str) -> Option<&str> {
        let entry = entry.trim_start_matches('/');
        self.urls
            .iter()
            .find(|url| {
                url.len() > entry.len()
                    && url.ends_with(entry)
                    && url[..url.len() - entry.len()].ends_with('/')
            })
            .map(String::as_str)
    }
}

/// Resolves datasets to scenes through their mirrors.
pub struct MirrorResolver {
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    staging: Arc<StagingCache>,
    manifests: Mutex<HashMap<(String, Mirror), Arc<OnceCell<Arc<Advertised>>>>>,
    manifest_loads: AtomicU64,
}

impl MirrorResolver {
    pub fn new(staging: Arc<StagingCache>, fetcher: Option<Arc<dyn RemoteFetcher>>) -> Self {
        Self {
            fetcher,
            staging,
            manifests: Mutex::new(HashMap::new()),
            manifest_loads: AtomicU64::new(0),
        }
    }

    pub fn staging(&self) -> &StagingCache {
        &self.staging
    }

    /// Number of manifests fetched so far.
    pub fn manifest_loads(&self) -> u64 {
        self.manifest_loads.load(Ordering::Relaxed)
    }

    /// Find the scenes of `binding` for `step`.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires; every other failure is
    /// recorded as an attempt and resolution moves on.
    pub async fn resolve(
        &self,
        binding: &DatasetBinding,
        step: &TimeStep,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let dataset = &binding.dataset;
        let mut scenes = Vec::new();
        let mut attempts = Vec::new();

        for candidate in dataset.candidates(step) {
            if cancel.is_cancelled() {
                return Err(IngestionError::Cancelled);
            }
            let datafile = dataset.datafile_for(&candidate)?;

            for mirror in &binding.mirrors {
                match self.resolve_on_mirror(binding, &candidate, &datafile, mirror, cancel).await {
                    Ok(path) => {
                        debug!(
                            dataset = %dataset.id,
                            step = %candidate.native_step,
                            mirror = %mirror,
                            path = %path.display(),
                            "Resolved scene"
                        );
                        scenes.push(Scene {
                            dataset_id: dataset.id.clone(),
                            native_step: candidate.native_step,
                            tile: candidate.tile.clone(),
                            path,
                            mirror: mirror.to_string(),
                        });
                        break;
                    }
                    Err(FetchError::Cancelled) => return Err(IngestionError::Cancelled),
                    Err(err) => {
                        match err {
                            FetchError::NotFound(_) => debug!(
                                dataset = %dataset.id,
                                mirror = %mirror,
                                file = %datafile,
                                "Not on mirror"
                            ),
                            ref other => warn!(
                                dataset = %dataset.id,
                                mirror = %mirror,
                                file = %datafile,
                                error = %other,
                                "Mirror failed, trying next"
                            ),
                        }
                        attempts.push(format!("{} @ {}: {}", datafile, mirror, err));
                    }
                }
            }
        }

        if scenes.is_empty() {
            Ok(Resolution::NotFound { attempts })
        } else {
            Ok(Resolution::Found(scenes))
        }
    }

    async fn resolve_on_mirror(
        &self,
        binding: &DatasetBinding,
        candidate: &Candidate,
        datafile: &str,
        mirror: &Mirror,
        cancel: &CancellationToken,
    ) -> std::result::Result<PathBuf, FetchError> {
        let dataset = &binding.dataset;
        match &mirror.location {
            MirrorLocation::Local(root) => {
                let path = root.join(datafile);
                if tokio::fs::try_exists(&path).await? {
                    Ok(path)
                } else {
                    Err(FetchError::NotFound(path.display().to_string()))
                }
            }
            MirrorLocation::Remote(base) => {
                let fetcher = self
                    .fetcher
                    .as_ref()
                    .ok_or_else(|| FetchError::Network("no remote fetcher configured".to_string()))?;

                let url = match dataset.manifest_entry_for(candidate) {
                    Some(entry) => {
                        let entry = entry.map_err(|e| FetchError::NotFound(e.to_string()))?;
                        let advertised = self.advertised(binding, mirror).await?;
                        advertised
                            .find(&entry)
                            .map(str::to_string)
                            .ok_or_else(|| FetchError::NotFound(format!("{} not advertised", entry)))?
                    }
                    None => join_url(base, datafile),
                };

                let key = CacheKey::new(dataset.id.clone(), candidate.native_step, mirror.to_string(), datafile);
                let fetcher = Arc::clone(fetcher);
                self.staging
                    .get_or_fetch(&key, cancel, |partial| async move {
                        fetcher.download(&url, &partial).await.map(|_| ())
                    })
                    .await
            }
        }
    }

    /// Manifest of `binding` on `mirror`, fetched once and memoized.
    async fn advertised(
        &self,
        binding: &DatasetBinding,
        mirror: &Mirror,
    ) -> std::result::Result<Arc<Advertised>, FetchError> {
        let Some(manifest) = binding.dataset.manifest.as_ref() else {
            return Ok(Arc::new(Advertised::default()));
        };
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| FetchError::Network("no remote fetcher configured".to_string()))?;

        let cell = {
            let mut manifests = self.manifests.lock().await;
            Arc::clone(
                manifests
                    .entry((binding.dataset.id.clone(), mirror.clone()))
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let advertised = cell
            .get_or_try_init(|| async {
                self.manifest_loads.fetch_add(1, Ordering::Relaxed);
                let urls = fetcher.list_advertised(&manifest.url).await?;
                info!(dataset = %binding.dataset.id, entries = urls.len(), "Manifest loaded");
                Ok::<_, FetchError>(Arc::new(Advertised { urls }))
            })
            .await?;
        Ok(Arc::clone(advertised))
    }

    /// Native steps of `binding` available on each mirror, without
    /// downloading anything.
    pub async fn list_available(&self, binding: &DatasetBinding) -> Vec<TimeStep> {
        let dataset = &binding.dataset;
        let mut steps = Vec::new();

        for mirror in &binding.mirrors {
            match &mirror.location {
                MirrorLocation::Local(root) => {
                    let root = root.clone();
                    let dataset = Arc::clone(dataset);
                    let listed = tokio::task::spawn_blocking(move || list_available(&dataset, &root)).await;
                    match listed {
                        Ok(Ok(files)) => steps.extend(files.into_iter().map(|f| f.step)),
                        Ok(Err(err)) => warn!(mirror = %mirror, error = %err, "Cannot list mirror"),
                        Err(err) => warn!(mirror = %mirror, error = %err, "Listing task failed"),
                    }
                }
                MirrorLocation::Remote(_) => {
                    let Some(manifest) = dataset.manifest.as_ref() else {
                        debug!(dataset = %dataset.id, mirror = %mirror, "No manifest, availability unknown");
                        continue;
                    };
                    let advertised = match self.advertised(binding, mirror).await {
                        Ok(advertised) => advertised,
                        Err(err) => {
                            warn!(mirror = %mirror, error = %err, "Cannot load manifest");
                            continue;
                        }
                    };
                    let Ok(pattern) = manifest.entry.pattern(&[]) else {
                        continue;
                    };
                    for url in &advertised.urls {
                        // Match the longest suffix at a path boundary.
                        let matched = url
                            .match_indices('/')
                            .map(|(i, _)| &url[i + 1..])
                            .find_map(|suffix| pattern.parse(suffix));
                        if let Some(matched) = matched {
                            steps.push(TimeStep::containing(matched.date, dataset.cadence));
                        }
                    }
                }
            }
        }

        steps.sort();
        steps.dedup();
        steps
    }
}
