//! Regular lat/lon grid specifications.
//!
//! Every raster handled by the pipeline is north-up on a plate carrée grid.
//! [`GridGeometry`] describes one such raster by its outer edges and pixel
//! counts; [`TargetGrid`] snaps an area of interest onto the fixed output
//! grid so that all frames of a series share extent and pixel centres.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{SeriesError, SeriesResult};

/// Relative tolerance used when comparing cell sizes and offsets.
const GRID_EPSILON: f64 = 1e-6;

/// Ground resolution expressed as pixels per degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pixels_per_degree: u32,
}

impl Resolution {
    pub fn from_pixels_per_degree(pixels_per_degree: u32) -> SeriesResult<Self> {
        if pixels_per_degree == 0 {
            return Err(SeriesError::InvalidResolution("0 pixels per degree".to_string()));
        }
        Ok(Self { pixels_per_degree })
    }

    /// Parse a resolution label: `1km`, `300m` (alias `333m`) or `<n>ppd`.
    pub fn parse(label: &str) -> SeriesResult<Self> {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "1km" => Self::from_pixels_per_degree(112),
            "300m" | "333m" => Self::from_pixels_per_degree(336),
            other => {
                let n = other
                    .strip_suffix("ppd")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| SeriesError::InvalidResolution(other.to_string()))?;
                Self::from_pixels_per_degree(n)
            }
        }
    }

    pub fn pixels_per_degree(&self) -> u32 {
        self.pixels_per_degree
    }

    /// Cell size in degrees.
    pub fn cell_size(&self) -> f64 {
        1.0 / f64::from(self.pixels_per_degree)
    }

    pub fn label(&self) -> String {
        match self.pixels_per_degree {
            112 => "1km".to_string(),
            336 => "300m".to_string(),
            n => format!("{}ppd", n),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A pixel centre of the target grid. All other centres lie at
/// `lon + i / ppd`, `lat - j / ppd`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridAnchor {
    pub lon: f64,
    pub lat: f64,
}

impl Default for GridAnchor {
    /// Pixel-centre origin of the global land product grids (180°W, 80°N).
    fn default() -> Self {
        Self {
            lon: -180.0,
            lat: 80.0,
        }
    }
}

/// North-up raster geometry: outer edges plus pixel counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub bbox: BoundingBox,
    pub width: usize,
    pub height: usize,
}

impl GridGeometry {
    pub fn new(bbox: BoundingBox, width: usize, height: usize) -> Self {
        Self {
            bbox,
            width,
            height,
        }
    }

    /// Cell size in longitude (degrees).
    pub fn res_x(&self) -> f64 {
        self.bbox.width() / self.width as f64
    }

    /// Cell size in latitude (degrees).
    pub fn res_y(&self) -> f64 {
        self.bbox.height() / self.height as f64
    }

    /// Pixels per degree along longitude.
    pub fn pixels_per_degree(&self) -> f64 {
        1.0 / self.res_x()
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Centre coordinates of a cell. Row 0 is the northern edge.
    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.bbox.min_x + (col as f64 + 0.5) * self.res_x(),
            self.bbox.max_y - (row as f64 + 0.5) * self.res_y(),
        )
    }

    /// Outer edges of a cell.
    pub fn cell_bounds(&self, col: usize, row: usize) -> BoundingBox {
        let min_x = self.bbox.min_x + col as f64 * self.res_x();
        let max_y = self.bbox.max_y - row as f64 * self.res_y();
        BoundingBox::new(min_x, max_y - self.res_y(), min_x + self.res_x(), max_y)
    }

    /// Fractional column/row position of a coordinate, in cell-centre units
    /// (0.0 is the centre of the first cell).
    pub fn fractional_index(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.bbox.min_x) / self.res_x() - 0.5,
            (self.bbox.max_y - lat) / self.res_y() - 0.5,
        )
    }

    /// GDAL-style geotransform `[ulx, xres, 0, uly, 0, -yres]`.
    pub fn geotransform(&self) -> [f64; 6] {
        [
            self.bbox.min_x,
            self.res_x(),
            0.0,
            self.bbox.max_y,
            0.0,
            -self.res_y(),
        ]
    }

    /// Same cell size and pixel centres offset by whole cells.
    pub fn is_aligned_with(&self, other: &GridGeometry) -> bool {
        if !self.same_resolution(other) {
            return false;
        }
        let dx = (other.bbox.min_x - self.bbox.min_x) / self.res_x();
        let dy = (self.bbox.max_y - other.bbox.max_y) / self.res_y();
        (dx - dx.round()).abs() < GRID_EPSILON && (dy - dy.round()).abs() < GRID_EPSILON
    }

    pub fn same_resolution(&self, other: &GridGeometry) -> bool {
        let rel = |a: f64, b: f64| ((a - b) / a).abs() < GRID_EPSILON;
        rel(self.res_x(), other.res_x()) && rel(self.res_y(), other.res_y())
    }
}

/// The fixed output grid of a run: a resolution plus the anchor of its
/// pixel centres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub resolution: Resolution,
    pub anchor: GridAnchor,
}

impl TargetGrid {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            anchor: GridAnchor::default(),
        }
    }

    pub fn with_anchor(mut self, anchor: GridAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Snap the area of interest to the nearest pixel centres of the grid.
    ///
    /// The result covers the columns whose centres run from the centre
    /// nearest `min_x` up to (excluding) the centre nearest `max_x`, and
    /// likewise for rows; at least one cell in each direction.
    pub fn align(&self, aoi: &BoundingBox) -> SeriesResult<GridGeometry> {
        let aoi = aoi.validated()?;
        let ppd = f64::from(self.resolution.pixels_per_degree());
        let cell = self.resolution.cell_size();

        let first_col = ((aoi.min_x - self.anchor.lon) * ppd).round();
        let last_col = ((aoi.max_x - self.anchor.lon) * ppd).round();
        let first_row = ((self.anchor.lat - aoi.max_y) * ppd).round();
        let last_row = ((self.anchor.lat - aoi.min_y) * ppd).round();

        let width = (last_col - first_col).max(1.0) as usize;
        let height = (last_row - first_row).max(1.0) as usize;

        let min_x = self.anchor.lon + (first_col - 0.5) * cell;
        let max_y = self.anchor.lat - (first_row - 0.5) * cell;
        let bbox = BoundingBox::new(
            min_x,
            max_y - height as f64 * cell,
            min_x + width as f64 * cell,
            max_y,
        );
        Ok(GridGeometry::new(bbox, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_labels() {
        assert_eq!(Resolution::parse("1km").unwrap().pixels_per_degree(), 112);
        assert_eq!(Resolution::parse("300m").unwrap().pixels_per_degree(), 336);
        assert_eq!(Resolution::parse("333M").unwrap().pixels_per_degree(), 336);
        assert_eq!(Resolution::parse("4ppd").unwrap().pixels_per_degree(), 4);
        assert!(Resolution::parse("2km").is_err());
        assert!(Resolution::parse("0ppd").is_err());
        assert_eq!(Resolution::parse("336ppd").unwrap().label(), "300m");
    }

    #[test]
    fn test_align_snaps_to_pixel_centres() {
        let grid = TargetGrid::new(Resolution::parse("1km").unwrap());
        let geometry = grid.align(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();

        assert_eq!(geometry.width, 112);
        assert_eq!(geometry.height, 112);
        let (lon, lat) = geometry.cell_center(0, 0);
        assert!(lon.abs() < 1e-9);
        assert!((lat - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_align_is_stable_for_nearby_aois() {
        let grid = TargetGrid::new(Resolution::from_pixels_per_degree(4).unwrap());
        let a = grid.align(&BoundingBox::new(10.0, 20.0, 12.0, 21.0)).unwrap();
        let b = grid.align(&BoundingBox::new(10.05, 20.02, 11.99, 21.1)).unwrap();
        assert_eq!(a, b);
        assert!(a.is_aligned_with(&b));
    }

    #[test]
    fn test_align_tiny_aoi_yields_one_cell() {
        let grid = TargetGrid::new(Resolution::from_pixels_per_degree(1).unwrap());
        let geometry = grid.align(&BoundingBox::new(5.1, 5.1, 5.2, 5.2)).unwrap();
        assert_eq!((geometry.width, geometry.height), (1, 1));
    }

    #[test]
    fn test_geotransform_and_fractional_index() {
        let geometry = GridGeometry::new(BoundingBox::new(0.0, 0.0, 4.0, 2.0), 8, 4);
        assert_eq!(geometry.geotransform(), [0.0, 0.5, 0.0, 2.0, 0.0, -0.5]);
        let (x, y) = geometry.fractional_index(0.25, 1.75);
        assert!(x.abs() < 1e-12 && y.abs() < 1e-12);
        assert_eq!(geometry.cell_bounds(1, 1), BoundingBox::new(0.5, 1.0, 1.0, 1.5));
    }

    #[test]
    fn test_alignment_detection() {
        let a = GridGeometry::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0), 4, 4);
        let shifted = GridGeometry::new(BoundingBox::new(1.0, 1.0, 3.0, 3.0), 2, 2);
        let half = GridGeometry::new(BoundingBox::new(0.5, 0.0, 4.5, 4.0), 4, 4);
        let finer = GridGeometry::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0), 8, 8);
        assert!(a.is_aligned_with(&shifted));
        assert!(!a.is_aligned_with(&half));
        assert!(!a.is_aligned_with(&finer));
    }
}
