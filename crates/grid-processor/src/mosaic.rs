//! Merging of adjacent or overlapping scenes of one dataset.
//!
//! Scenes are merged on their own (shared) native grid over the window that
//! the target area needs; the resampler then takes the merged raster to the
//! target grid. Coverage is computed on the target grid so callers can report
//! or fill the cells no scene reaches.

use serde::{Deserialize, Serialize};
use series_common::{BoundingBox, GridGeometry};
use tracing::debug;

use crate::error::{GridProcessorError, Result};
use crate::types::GridRegion;

/// Source cells kept around the target area so aggregation footprints and
/// interpolation kernels at the edges see their neighbours.
const WINDOW_MARGIN_CELLS: f64 = 2.0;

/// Target cells that no scene covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingRegion {
    pub missing_cells: usize,
    pub total_cells: usize,
    /// Outer bounds of the missing cells, if any.
    pub bbox: Option<BoundingBox>,
}

impl MissingRegion {
    pub fn is_empty(&self) -> bool {
        self.missing_cells == 0
    }

    pub fn fraction(&self) -> f64 {
        if self.total_cells == 0 {
            0.0
        } else {
            self.missing_cells as f64 / self.total_cells as f64
        }
    }
}

/// Per-cell coverage of the target grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Coverage {
    /// Row-major, `true` where some scene covers the cell centre.
    pub mask: Vec<bool>,
    pub missing: MissingRegion,
}

impl Coverage {
    /// Coverage of `target` by the union of `footprints`.
    pub fn of(target: &GridGeometry, footprints: &[BoundingBox]) -> Self {
        let mut mask = vec![false; target.len()];
        for row in 0..target.height {
            for col in 0..target.width {
                let (lon, lat) = target.cell_center(col, row);
                mask[row * target.width + col] = footprints.iter().any(|fp| fp.contains_point(lon, lat));
            }
        }
        Self::from_mask(target, mask)
    }

    /// Coverage from a row-major per-cell mask of `target`.
    pub fn from_mask(target: &GridGeometry, mask: Vec<bool>) -> Self {
        let mut missing_bbox: Option<BoundingBox> = None;
        let mut missing_cells = 0;

        for (idx, covered) in mask.iter().enumerate() {
            if *covered {
                continue;
            }
            missing_cells += 1;
            let cell = target.cell_bounds(idx % target.width, idx / target.width);
            missing_bbox = Some(match missing_bbox {
                Some(bbox) => bbox.union(&cell),
                None => cell,
            });
        }

        Self {
            mask,
            missing: MissingRegion {
                missing_cells,
                total_cells: target.len(),
                bbox: missing_bbox,
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Number of covered cells.
    pub fn covered_cells(&self) -> usize {
        self.mask.iter().filter(|c| **c).count()
    }
}

/// Scenes merged on their native grid, plus target-grid coverage.
#[derive(Debug, Clone)]
pub struct Mosaic {
    pub raster: GridRegion,
    pub coverage: Coverage,
    /// Number of input scenes that contributed at least one cell.
    pub contributing_scenes: usize,
}

/// Merges scenes of one dataset into a single raster.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mosaicker;

impl Mosaicker {
    pub fn new() -> Self {
        Self
    }

    /// Merge `scenes` (in preference order) over the area of `target`.
    ///
    /// Earlier scenes win every cell they cover. All scenes must share one
    /// pixel grid. Fails with `NoOverlap` if no scene touches the target.
    pub fn merge<S: AsRef<GridRegion>>(&self, scenes: &[S], target: &GridGeometry) -> Result<Mosaic> {
        let first = scenes
            .first()
            .ok_or_else(|| GridProcessorError::invalid_raster("no scenes to merge"))?
            .as_ref();
        let reference = first.geometry();

        for scene in scenes.iter().skip(1) {
            if !scene.as_ref().geometry().is_aligned_with(&reference) {
                return Err(GridProcessorError::IncompatibleGrids(format!(
                    "scene {:?} is not on the grid of {:?}",
                    scene.as_ref().bbox,
                    reference.bbox
                )));
            }
        }

        let overlapping: Vec<&GridRegion> = scenes
            .iter()
            .map(AsRef::as_ref)
            .filter(|scene| scene.bbox.intersects(&target.bbox))
            .collect();
        if overlapping.is_empty() {
            return Err(GridProcessorError::no_overlap(first.bbox, target.bbox));
        }

        let window = native_window(&reference, &overlapping, target);
        let mut data = vec![f32::NAN; window.len()];
        let mut filled = vec![false; window.len()];
        let mut contributing_scenes = 0;

        for scene in &overlapping {
            let col_offset = ((scene.bbox.min_x - window.bbox.min_x) / reference.res_x()).round() as i64;
            let row_offset = ((window.bbox.max_y - scene.bbox.max_y) / reference.res_y()).round() as i64;
            let mut contributed = false;

            for row in 0..scene.height {
                let out_row = row as i64 + row_offset;
                if out_row < 0 || out_row >= window.height as i64 {
                    continue;
                }
                for col in 0..scene.width {
                    let out_col = col as i64 + col_offset;
                    if out_col < 0 || out_col >= window.width as i64 {
                        continue;
                    }
                    let idx = out_row as usize * window.width + out_col as usize;
                    if !filled[idx] {
                        filled[idx] = true;
                        data[idx] = scene.data[row * scene.width + col];
                        contributed = true;
                    }
                }
            }
            if contributed {
                contributing_scenes += 1;
            }
        }

        let footprints: Vec<BoundingBox> = overlapping.iter().map(|s| s.bbox).collect();
        let coverage = Coverage::of(target, &footprints);
        debug!(
            scenes = scenes.len(),
            contributing = contributing_scenes,
            missing_cells = coverage.missing.missing_cells,
            "Merged scenes"
        );

        Ok(Mosaic {
            raster: GridRegion::from_geometry(data, &window)?,
            coverage,
            contributing_scenes,
        })
    }
}

/// The part of the reference grid covering the target (plus margin),
/// clipped to the union of the scenes.
fn native_window(reference: &GridGeometry, scenes: &[&GridRegion], target: &GridGeometry) -> GridGeometry {
    let res_x = reference.res_x();
    let res_y = reference.res_y();

    let union = scenes
        .iter()
        .skip(1)
        .fold(scenes[0].bbox, |acc, scene| acc.union(&scene.bbox));
    let wanted = BoundingBox::new(
        target.bbox.min_x - WINDOW_MARGIN_CELLS * res_x,
        target.bbox.min_y - WINDOW_MARGIN_CELLS * res_y,
        target.bbox.max_x + WINDOW_MARGIN_CELLS * res_x,
        target.bbox.max_y + WINDOW_MARGIN_CELLS * res_y,
    );
    let area = wanted.intersection(&union).unwrap_or(union);

    let first_col = ((area.min_x - reference.bbox.min_x) / res_x + 1e-9).floor();
    let end_col = ((area.max_x - reference.bbox.min_x) / res_x - 1e-9).ceil();
    let first_row = ((reference.bbox.max_y - area.max_y) / res_y + 1e-9).floor();
    let end_row = ((reference.bbox.max_y - area.min_y) / res_y - 1e-9).ceil();

    let width = (end_col - first_col).max(1.0) as usize;
    let height = (end_row - first_row).max(1.0) as usize;
    let min_x = reference.bbox.min_x + first_col * res_x;
    let max_y = reference.bbox.max_y - first_row * res_y;

    GridGeometry::new(
        BoundingBox::new(min_x, max_y - height as f64 * res_y, min_x + width as f64 * res_x, max_y),
        width,
        height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::Resampler;
    use crate::types::QualityMask;

    fn tile(value: f32, min_x: f64, min_y: f64, size: usize) -> GridRegion {
        GridRegion::new(
            vec![value; size * size],
            size,
            size,
            BoundingBox::new(min_x, min_y, min_x + size as f64 * 0.25, min_y + size as f64 * 0.25),
        )
        .unwrap()
    }

    #[test]
    fn test_two_adjacent_tiles_have_no_seam() {
        let west = tile(1.0, 0.0, 0.0, 4);
        let east = tile(2.0, 1.0, 0.0, 4);
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 2.0, 1.0), 8, 4);

        let mosaic = Mosaicker::new().merge(&[west, east], &target).unwrap();
        assert!(mosaic.coverage.is_complete());
        assert_eq!(mosaic.contributing_scenes, 2);

        let frame = Resampler::default()
            .resample(&mosaic.raster, &target, &QualityMask::accept_all())
            .unwrap();
        for row in 0..4 {
            for col in 0..8 {
                let expected = if col < 4 { 1.0 } else { 2.0 };
                assert_eq!(frame.get(col, row), Some(expected), "cell ({}, {})", col, row);
            }
        }
    }

    #[test]
    fn test_coverage_from_mask() {
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 2, 2);
        let coverage = Coverage::from_mask(&target, vec![true, false, true, true]);
        assert_eq!(coverage.missing.missing_cells, 1);
        assert_eq!(coverage.covered_cells(), 3);
        assert_eq!(coverage.missing.bbox, Some(BoundingBox::new(0.5, 0.5, 1.0, 1.0)));
    }

    #[test]
    fn test_earlier_scene_wins_overlap() {
        let preferred = tile(1.0, 0.0, 0.0, 4);
        let fallback = tile(9.0, 0.5, 0.0, 4);
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 1.5, 1.0), 6, 4);

        let mosaic = Mosaicker::new().merge(&[preferred, fallback], &target).unwrap();
        let frame = Resampler::default()
            .resample(&mosaic.raster, &target, &QualityMask::accept_all())
            .unwrap();
        assert_eq!(frame.get(3, 0), Some(1.0));
        assert_eq!(frame.get(4, 0), Some(9.0));
    }

    #[test]
    fn test_missing_region_reported() {
        let only = tile(1.0, 0.0, 0.0, 4);
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 2.0, 1.0), 8, 4);

        let mosaic = Mosaicker::new().merge(&[only], &target).unwrap();
        let missing = &mosaic.coverage.missing;
        assert_eq!(missing.missing_cells, 16);
        assert_eq!(missing.total_cells, 32);
        assert!((missing.fraction() - 0.5).abs() < 1e-12);
        assert_eq!(missing.bbox, Some(BoundingBox::new(1.0, 0.0, 2.0, 1.0)));
        assert_eq!(mosaic.coverage.covered_cells(), 16);
    }

    #[test]
    fn test_misaligned_scenes_rejected() {
        let a = tile(1.0, 0.0, 0.0, 4);
        let b = tile(1.0, 0.1, 0.0, 4);
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 4, 4);
        let result = Mosaicker::new().merge(&[a, b], &target);
        assert!(matches!(result, Err(GridProcessorError::IncompatibleGrids(_))));
    }

    #[test]
    fn test_no_overlap() {
        let a = tile(1.0, 50.0, 50.0, 4);
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 4, 4);
        let result = Mosaicker::new().merge(&[a], &target);
        assert!(matches!(result, Err(GridProcessorError::NoOverlap { .. })));
    }

    #[test]
    fn test_empty_input() {
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 4, 4);
        let scenes: Vec<GridRegion> = Vec::new();
        assert!(Mosaicker::new().merge(&scenes, &target).is_err());
    }
}
