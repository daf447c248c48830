//! Core types for grid processing.

use serde::{Deserialize, Serialize};
use series_common::{BoundingBox, GridGeometry};

use crate::error::{GridProcessorError, Result};

/// Raster data on a north-up lat/lon grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRegion {
    /// The grid values (row-major order, top-to-bottom). NaN marks no data.
    pub data: Vec<f32>,
    /// Width of the region in grid points.
    pub width: usize,
    /// Height of the region in grid points.
    pub height: usize,
    /// Outer edges of the region.
    pub bbox: BoundingBox,
    /// Resolution in degrees per grid point (lon, lat).
    pub resolution: (f64, f64),
}

impl GridRegion {
    /// Create a region, checking the data length against the geometry.
    pub fn new(data: Vec<f32>, width: usize, height: usize, bbox: BoundingBox) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GridProcessorError::invalid_raster(format!(
                "empty raster {}x{}",
                width, height
            )));
        }
        if data.len() != width * height {
            return Err(GridProcessorError::invalid_raster(format!(
                "expected {} values for {}x{}, got {}",
                width * height,
                width,
                height,
                data.len()
            )));
        }
        if !(bbox.width() > 0.0 && bbox.height() > 0.0) {
            return Err(GridProcessorError::invalid_raster(format!(
                "degenerate bounds {:?}",
                bbox
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            bbox,
            resolution: (bbox.width() / width as f64, bbox.height() / height as f64),
        })
    }

    /// Create a region from a geometry.
    pub fn from_geometry(data: Vec<f32>, geometry: &GridGeometry) -> Result<Self> {
        Self::new(data, geometry.width, geometry.height, geometry.bbox)
    }

    /// A region of `geometry` filled with `value`.
    pub fn filled(geometry: &GridGeometry, value: f32) -> Self {
        Self {
            data: vec![value; geometry.len()],
            width: geometry.width,
            height: geometry.height,
            bbox: geometry.bbox,
            resolution: (geometry.res_x(), geometry.res_y()),
        }
    }

    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::new(self.bbox, self.width, self.height)
    }

    /// Get the value at a specific grid coordinate.
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.data.get(row * self.width + col).copied()
    }

    /// Set the value at a specific grid coordinate. Out-of-range writes are ignored.
    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        if col < self.width && row < self.height {
            self.data[row * self.width + col] = value;
        }
    }

    /// Get the value at a geographic coordinate using nearest neighbor.
    pub fn get_at_coords(&self, lon: f64, lat: f64) -> Option<f32> {
        if !self.bbox.contains_point(lon, lat) {
            return None;
        }

        let col = ((lon - self.bbox.min_x) / self.resolution.0).floor() as usize;
        let row = ((self.bbox.max_y - lat) / self.resolution.1).floor() as usize;

        self.get(col.min(self.width - 1), row.min(self.height - 1))
    }

    /// Get the total number of grid points.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate heap size of the values in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl AsRef<GridRegion> for GridRegion {
    fn as_ref(&self) -> &GridRegion {
        self
    }
}

/// Per-pixel validity rules of a dataset.
///
/// Values outside `valid_range` or equal to one of `fill_values` are treated
/// as missing, as are NaN values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMask {
    #[serde(default)]
    pub valid_range: Option<(f32, f32)>,
    #[serde(default)]
    pub fill_values: Vec<f32>,
}

impl QualityMask {
    pub fn new(valid_range: Option<(f32, f32)>, fill_values: Vec<f32>) -> Self {
        Self {
            valid_range,
            fill_values,
        }
    }

    /// Accepts every finite value.
    pub fn accept_all() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_valid(&self, value: f32) -> bool {
        if value.is_nan() || self.fill_values.contains(&value) {
            return false;
        }
        match self.valid_range {
            Some((min, max)) => value >= min && value <= max,
            None => true,
        }
    }

    /// Replace every invalid value by NaN.
    pub fn apply(&self, data: &mut [f32]) {
        for value in data.iter_mut() {
            if !self.is_valid(*value) {
                *value = f32::NAN;
            }
        }
    }
}

/// Interpolation method for grid resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest neighbor (preserves exact values).
    Nearest,
    /// Bilinear interpolation (smooth, slight value changes).
    #[default]
    Bilinear,
    /// Bicubic interpolation (smoothest, more compute).
    Cubic,
}

impl InterpolationMethod {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nearest" => Self::Nearest,
            "cubic" | "bicubic" => Self::Cubic,
            _ => Self::Bilinear,
        }
    }
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
            Self::Cubic => write!(f, "cubic"),
        }
    }
}

/// Statistics about the scene cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_region_get() {
        let data: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let region = GridRegion::new(data, 3, 3, BoundingBox::new(0.0, 0.0, 3.0, 3.0)).unwrap();

        assert_eq!(region.get(0, 0), Some(0.0));
        assert_eq!(region.get(2, 2), Some(8.0));
        assert_eq!(region.get(1, 1), Some(4.0));
        assert_eq!(region.get(3, 0), None);
        assert_eq!(region.resolution, (1.0, 1.0));
    }

    #[test]
    fn test_grid_region_rejects_bad_length() {
        let result = GridRegion::new(vec![0.0; 5], 3, 3, BoundingBox::new(0.0, 0.0, 3.0, 3.0));
        assert!(matches!(result, Err(GridProcessorError::InvalidRaster(_))));
    }

    #[test]
    fn test_get_at_coords_north_up() {
        let data: Vec<f32> = (0..4).map(|i| i as f32).collect();
        let region = GridRegion::new(data, 2, 2, BoundingBox::new(0.0, 0.0, 2.0, 2.0)).unwrap();

        assert_eq!(region.get_at_coords(0.5, 1.5), Some(0.0));
        assert_eq!(region.get_at_coords(1.5, 0.5), Some(3.0));
        assert_eq!(region.get_at_coords(2.0, 0.0), Some(3.0));
        assert_eq!(region.get_at_coords(3.0, 0.5), None);
    }

    #[test]
    fn test_quality_mask() {
        let mask = QualityMask::new(Some((0.0, 250.0)), vec![251.0, 255.0]);
        assert!(mask.is_valid(0.0));
        assert!(mask.is_valid(250.0));
        assert!(!mask.is_valid(251.0));
        assert!(!mask.is_valid(-1.0));
        assert!(!mask.is_valid(f32::NAN));

        let mut data = vec![10.0, 255.0, 300.0];
        mask.apply(&mut data);
        assert_eq!(data[0], 10.0);
        assert!(data[1].is_nan() && data[2].is_nan());
    }

    #[test]
    fn test_interpolation_method_from_str() {
        assert_eq!(InterpolationMethod::from_str("nearest"), InterpolationMethod::Nearest);
        assert_eq!(InterpolationMethod::from_str("BILINEAR"), InterpolationMethod::Bilinear);
        assert_eq!(InterpolationMethod::from_str("bicubic"), InterpolationMethod::Cubic);
        assert_eq!(InterpolationMethod::from_str("invalid"), InterpolationMethod::Bilinear);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);

        stats.hits = 80;
        stats.misses = 20;
        assert!((stats.hit_rate() - 0.8).abs() < f64::EPSILON);
    }
}
