//! Source datasets, their mirrors and the bindings between them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use grid_processor::QualityMask;
use series_common::{Cadence, NamingTemplate, Resolution, SeriesResult, TimeStep};

/// Placeholder that selects one tile of a tiled dataset.
pub const TILE_PLACEHOLDER: &str = "tile";

/// Listing of the files a remote archive advertises.
#[derive(Debug, Clone)]
pub struct ManifestSpec {
    /// Absolute URL of the manifest.
    pub url: String,
    /// Path of a data file as it appears at the end of a manifest line.
    pub entry: NamingTemplate,
}

/// A source product. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub resolution: Resolution,
    pub cadence: Cadence,
    /// Path of a data file relative to a mirror root.
    pub datafile: NamingTemplate,
    pub manifest: Option<ManifestSpec>,
    /// Tile names substituted for `$(tile)`; empty for untiled products.
    pub tiles: Vec<String>,
    pub quality: QualityMask,
}

/// One file that may hold data for a requested step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub native_step: TimeStep,
    pub tile: Option<String>,
}

impl Candidate {
    fn vars(&self) -> Vec<(&str, &str)> {
        match &self.tile {
            Some(tile) => vec![(TILE_PLACEHOLDER, tile.as_str())],
            None => Vec::new(),
        }
    }
}

impl Dataset {
    pub fn new(id: impl Into<String>, resolution: Resolution, cadence: Cadence, datafile: NamingTemplate) -> Self {
        Self {
            id: id.into(),
            resolution,
            cadence,
            datafile,
            manifest: None,
            tiles: Vec::new(),
            quality: QualityMask::accept_all(),
        }
    }

    pub fn with_manifest(mut self, manifest: ManifestSpec) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_tiles(mut self, tiles: Vec<String>) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn with_quality(mut self, quality: QualityMask) -> Self {
        self.quality = quality;
        self
    }

    /// Files to look for when assembling `step`, in preference order.
    ///
    /// Native steps overlapping `step` come most recent first; within a
    /// native step tiles keep their declared order.
    pub fn candidates(&self, step: &TimeStep) -> Vec<Candidate> {
        let mut native_steps = step.overlapping(self.cadence);
        native_steps.reverse();

        let mut candidates = Vec::new();
        for native_step in native_steps {
            if self.tiles.is_empty() {
                candidates.push(Candidate { native_step, tile: None });
            } else {
                for tile in &self.tiles {
                    candidates.push(Candidate {
                        native_step,
                        tile: Some(tile.clone()),
                    });
                }
            }
        }
        candidates
    }

    /// Relative path of the data file for `candidate`.
    pub fn datafile_for(&self, candidate: &Candidate) -> SeriesResult<String> {
        self.datafile.resolve(&candidate.native_step, &candidate.vars())
    }

    /// Manifest suffix for `candidate`, if the dataset has a manifest.
    pub fn manifest_entry_for(&self, candidate: &Candidate) -> Option<SeriesResult<String>> {
        self.manifest
            .as_ref()
            .map(|manifest| manifest.entry.resolve(&candidate.native_step, &candidate.vars()))
    }
}

/// How a mirror is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MirrorLocation {
    /// Directory holding the archive layout.
    Local(PathBuf),
    /// Base URL of the archive.
    Remote(String),
}

/// One copy of a dataset's archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mirror {
    pub location: MirrorLocation,
}

impl Mirror {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            location: MirrorLocation::Local(path.into()),
        }
    }

    pub fn remote(base_url: impl Into<String>) -> Self {
        Self {
            location: MirrorLocation::Remote(base_url.into().trim_end_matches('/').to_string()),
        }
    }

    /// `http://` and `https://` locations are remote, anything else a path.
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::remote(location)
        } else {
            Self::local(location)
        }
    }

    pub fn access_mode(&self) -> AccessMode {
        match self.location {
            MirrorLocation::Local(_) => AccessMode::Local,
            MirrorLocation::Remote(_) => AccessMode::Remote,
        }
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            MirrorLocation::Local(path) => write!(f, "{}", path.display()),
            MirrorLocation::Remote(url) => f.write_str(url),
        }
    }
}

/// A dataset with the mirrors to try for it, in order.
#[derive(Debug, Clone)]
pub struct DatasetBinding {
    pub dataset: Arc<Dataset>,
    pub mirrors: Vec<Mirror>,
}

impl DatasetBinding {
    pub fn new(dataset: Dataset, mirrors: Vec<Mirror>) -> Self {
        Self {
            dataset: Arc::new(dataset),
            mirrors,
        }
    }

    pub fn id(&self) -> &str {
        &self.dataset.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_common::parse_date;

    fn dekadal(template: &str) -> Dataset {
        Dataset::new(
            "TEST",
            Resolution::parse("1km").unwrap(),
            Cadence::Dekad,
            NamingTemplate::parse(template).unwrap(),
        )
    }

    fn step(date: &str, cadence: Cadence) -> TimeStep {
        TimeStep::containing(parse_date(date).unwrap(), cadence)
    }

    #[test]
    fn test_untiled_candidate() {
        let dataset = dekadal("$(yyyy)/$(yyyy)$(mm)$(dd)/ndvi.tif");
        let candidates = dataset.candidates(&step("2020-06-25", Cadence::Dekad));
        assert_eq!(candidates.len(), 1);
        assert_eq!(dataset.datafile_for(&candidates[0]).unwrap(), "2020/20200621/ndvi.tif");
        assert!(dataset.manifest_entry_for(&candidates[0]).is_none());
    }

    #[test]
    fn test_tiles_in_declared_order() {
        let dataset =
            dekadal("$(yyyy)$(mm)$(dd)_$(tile).tif").with_tiles(vec!["X18Y03".to_string(), "X19Y03".to_string()]);
        let candidates = dataset.candidates(&step("2020-06-01", Cadence::Dekad));
        let files: Vec<String> = candidates.iter().map(|c| dataset.datafile_for(c).unwrap()).collect();
        assert_eq!(files, vec!["20200601_X18Y03.tif", "20200601_X19Y03.tif"]);
    }

    #[test]
    fn test_daily_dataset_most_recent_first() {
        let mut dataset = dekadal("$(yyyy)$(mm)$(dd).tif");
        dataset.cadence = Cadence::Daily;
        let candidates = dataset.candidates(&step("2020-06-21", Cadence::Dekad));
        assert_eq!(candidates.len(), 10);
        assert_eq!(dataset.datafile_for(&candidates[0]).unwrap(), "20200630.tif");
        assert_eq!(dataset.datafile_for(&candidates[9]).unwrap(), "20200621.tif");
    }

    #[test]
    fn test_mirror_parse() {
        assert_eq!(Mirror::parse("/data/cgls").access_mode(), AccessMode::Local);
        let remote = Mirror::parse("https://land.example.org/datapool/");
        assert_eq!(remote.access_mode(), AccessMode::Remote);
        assert_eq!(remote.to_string(), "https://land.example.org/datapool");
    }
}
