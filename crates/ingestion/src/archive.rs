//! Reading archived scenes.
//!
//! Scenes are single-band GeoTIFFs. Georeferencing comes from the world
//! file next to the image (`.tfw`) or, failing that, from the GeoTIFF
//! pixel-scale and tiepoint tags. Only north-up lat/lon rasters are
//! supported.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use grid_processor::{GridProcessorError, GridRegion, SceneCache};
use series_common::{BoundingBox, TimeStep};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::dataset::Dataset;

/// Decodes archived scenes into rasters.
pub trait ArchiveReader: Send + Sync {
    /// Open the scene at `path`, a file of `dataset`.
    fn open_raster(&self, path: &Path, dataset: &Dataset) -> grid_processor::Result<Arc<GridRegion>>;
}

/// GeoTIFF reader with an LRU of decoded scenes.
pub struct TiffArchive {
    cache: Mutex<SceneCache>,
}

impl TiffArchive {
    pub fn new(cache_size_bytes: usize) -> Self {
        Self {
            cache: Mutex::new(SceneCache::new(cache_size_bytes)),
        }
    }

    pub fn cache_stats(&self) -> grid_processor::CacheStats {
        match self.cache.lock() {
            Ok(cache) => cache.stats(),
            Err(poisoned) => poisoned.into_inner().stats(),
        }
    }
}

impl ArchiveReader for TiffArchive {
    fn open_raster(&self, path: &Path, dataset: &Dataset) -> grid_processor::Result<Arc<GridRegion>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(scene) = cache.get(path) {
                debug!(path = %path.display(), "Scene cache hit");
                return Ok(scene);
            }
        }

        let scene = Arc::new(read_geotiff(path)?);
        debug!(
            dataset = %dataset.id,
            path = %path.display(),
            width = scene.width,
            height = scene.height,
            "Decoded scene"
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_path_buf(), Arc::clone(&scene));
        }
        Ok(scene)
    }
}

/// Decode a single-band GeoTIFF into a raster.
pub fn read_geotiff(path: &Path) -> grid_processor::Result<GridRegion> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| GridProcessorError::read_failed(format!("{}: {}", path.display(), e)))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| GridProcessorError::read_failed(format!("{}: {}", path.display(), e)))?;
    let (width, height) = (width as usize, height as usize);

    let bbox = match read_world_file(&path.with_extension("tfw"), width, height)? {
        Some(bbox) => bbox,
        None => read_geotiff_tags(&mut decoder, width, height).ok_or_else(|| {
            GridProcessorError::read_failed(format!("{}: no world file or GeoTIFF georeferencing", path.display()))
        })?,
    };

    let image = decoder
        .read_image()
        .map_err(|e| GridProcessorError::read_failed(format!("{}: {}", path.display(), e)))?;
    let data: Vec<f32> = match image {
        DecodingResult::U8(values) => values.into_iter().map(f32::from).collect(),
        DecodingResult::U16(values) => values.into_iter().map(f32::from).collect(),
        DecodingResult::I8(values) => values.into_iter().map(f32::from).collect(),
        DecodingResult::I16(values) => values.into_iter().map(f32::from).collect(),
        DecodingResult::U32(values) => values.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(values) => values.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(values) => values,
        DecodingResult::F64(values) => values.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(GridProcessorError::read_failed(format!(
                "{}: unsupported sample format",
                path.display()
            )))
        }
    };

    GridRegion::new(data, width, height, bbox)
}

/// Parse a world file (pixel-centre convention). Returns `None` if absent.
pub fn read_world_file(path: &Path, width: usize, height: usize) -> grid_processor::Result<Option<BoundingBox>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let values: Vec<f64> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| GridProcessorError::read_failed(format!("{}: {}", path.display(), e)))?;
    let &[a, d, b, e, c, f] = values.as_slice() else {
        return Err(GridProcessorError::read_failed(format!(
            "{}: expected 6 values, found {}",
            path.display(),
            values.len()
        )));
    };
    if b != 0.0 || d != 0.0 || a <= 0.0 || e >= 0.0 {
        return Err(GridProcessorError::read_failed(format!(
            "{}: only north-up rasters are supported",
            path.display()
        )));
    }

    let min_x = c - a / 2.0;
    let max_y = f - e / 2.0;
    Ok(Some(BoundingBox::new(
        min_x,
        max_y + e * height as f64,
        min_x + a * width as f64,
        max_y,
    )))
}

fn read_geotiff_tags<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    width: usize,
    height: usize,
) -> Option<BoundingBox> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    let (res_x, res_y) = (scale[0], scale[1]);
    let min_x = tiepoint[3] - tiepoint[0] * res_x;
    let max_y = tiepoint[4] + tiepoint[1] * res_y;
    Some(BoundingBox::new(
        min_x,
        max_y - res_y * height as f64,
        min_x + res_x * width as f64,
        max_y,
    ))
}

/// A file found in a local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableFile {
    pub step: TimeStep,
    pub path: PathBuf,
}

/// Walk a local mirror and recover the native step of every data file of
/// `dataset`, sorted by step.
pub fn list_available(dataset: &Dataset, root: &Path) -> series_common::SeriesResult<Vec<AvailableFile>> {
    let pattern = dataset.datafile.pattern(&[])?;
    let mut found = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "Skipping unreadable mirror entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if let Some(matched) = pattern.parse(&relative) {
            found.push(AvailableFile {
                step: TimeStep::containing(matched.date, dataset.cadence),
                path: entry.path().to_path_buf(),
            });
        }
    }

    found.sort_by(|a, b| a.step.cmp(&b.step).then_with(|| a.path.cmp(&b.path)));
    Ok(found)
}
