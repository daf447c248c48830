//! Resampling of a raster onto a target grid.

use rayon::prelude::*;
use series_common::GridGeometry;
use tracing::debug;

use crate::config::ResampleConfig;
use crate::downsample::aggregate;
use crate::error::{GridProcessorError, Result};
use crate::interpolation::interpolate;
use crate::types::{GridRegion, QualityMask};

/// Tolerance on the resolution ratio below which two grids count as equal.
const RATIO_EPSILON: f64 = 1e-6;

/// Guards footprint edges against rounding when cell centres sit exactly on
/// a target cell edge.
const EDGE_EPSILON: f64 = 1e-9;

/// How a source raster maps onto the target grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResampleStrategy {
    /// Same resolution and pixel centres: copy cells by index.
    Copy { col_offset: i64, row_offset: i64 },
    /// Target coarser than source: reduce footprints.
    Aggregate,
    /// Target finer than source, or same resolution but shifted.
    Interpolate,
}

impl ResampleStrategy {
    pub fn select(source: &GridGeometry, target: &GridGeometry) -> Self {
        let ratio = target.res_x() / source.res_x();
        if (ratio - 1.0).abs() < RATIO_EPSILON {
            if source.is_aligned_with(target) {
                return ResampleStrategy::Copy {
                    col_offset: ((target.bbox.min_x - source.bbox.min_x) / source.res_x()).round() as i64,
                    row_offset: ((source.bbox.max_y - target.bbox.max_y) / source.res_y()).round() as i64,
                };
            }
            ResampleStrategy::Interpolate
        } else if ratio > 1.0 {
            ResampleStrategy::Aggregate
        } else {
            ResampleStrategy::Interpolate
        }
    }
}

/// Maps rasters of any resolution onto a target grid.
#[derive(Debug, Clone, Default)]
pub struct Resampler {
    config: ResampleConfig,
}

impl Resampler {
    pub fn new(config: ResampleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResampleConfig {
        &self.config
    }

    /// Resample `source` onto `target`, honouring the quality mask.
    ///
    /// Cells of the target outside the source come out as NaN. Fails with
    /// `NoOverlap` when the two share no area at all.
    pub fn resample(&self, source: &GridRegion, target: &GridGeometry, mask: &QualityMask) -> Result<GridRegion> {
        if source.len() != source.width * source.height {
            return Err(GridProcessorError::invalid_raster("data length does not match shape"));
        }
        if !source.bbox.intersects(&target.bbox) {
            return Err(GridProcessorError::no_overlap(source.bbox, target.bbox));
        }

        let source_geometry = source.geometry();
        let strategy = ResampleStrategy::select(&source_geometry, target);
        debug!(
            strategy = ?strategy,
            source_ppd = source_geometry.pixels_per_degree(),
            target_ppd = target.pixels_per_degree(),
            width = target.width,
            height = target.height,
            "Resampling raster"
        );

        let mut values = source.data.clone();
        mask.apply(&mut values);

        let mut output = vec![f32::NAN; target.len()];
        output
            .par_chunks_mut(target.width)
            .enumerate()
            .for_each(|(row, out_row)| match strategy {
                ResampleStrategy::Copy { col_offset, row_offset } => {
                    copy_row(&values, &source_geometry, col_offset, row_offset, row, out_row)
                }
                ResampleStrategy::Aggregate => {
                    self.aggregate_row(&values, &source_geometry, target, row, out_row)
                }
                ResampleStrategy::Interpolate => {
                    self.interpolate_row(&values, &source_geometry, target, row, out_row)
                }
            });

        GridRegion::from_geometry(output, target)
    }

    fn aggregate_row(&self, values: &[f32], source: &GridGeometry, target: &GridGeometry, row: usize, out_row: &mut [f32]) {
        let mut block = Vec::new();
        for (col, out) in out_row.iter_mut().enumerate() {
            let cell = target.cell_bounds(col, row);

            // Source cells whose centres lie in [min_x, max_x) x (min_y, max_y].
            let first_col = ((cell.min_x - source.bbox.min_x) / source.res_x() - 0.5 - EDGE_EPSILON).ceil();
            let end_col = ((cell.max_x - source.bbox.min_x) / source.res_x() - 0.5 - EDGE_EPSILON).ceil();
            let first_row = ((source.bbox.max_y - cell.max_y) / source.res_y() - 0.5 - EDGE_EPSILON).ceil();
            let end_row = ((source.bbox.max_y - cell.min_y) / source.res_y() - 0.5 - EDGE_EPSILON).ceil();

            let footprint = ((end_col - first_col).max(0.0) * (end_row - first_row).max(0.0)) as usize;
            if footprint == 0 {
                continue;
            }

            let c0 = first_col.clamp(0.0, source.width as f64) as usize;
            let c1 = end_col.clamp(0.0, source.width as f64) as usize;
            let r0 = first_row.clamp(0.0, source.height as f64) as usize;
            let r1 = end_row.clamp(0.0, source.height as f64) as usize;
            if c0 >= c1 || r0 >= r1 {
                continue;
            }

            block.clear();
            for r in r0..r1 {
                block.extend_from_slice(&values[r * source.width + c0..r * source.width + c1]);
            }
            *out = aggregate(&block, c1 - c0, self.config.aggregation, self.config.min_valid_cells(footprint));
        }
    }

    fn interpolate_row(&self, values: &[f32], source: &GridGeometry, target: &GridGeometry, row: usize, out_row: &mut [f32]) {
        for (col, out) in out_row.iter_mut().enumerate() {
            let (lon, lat) = target.cell_center(col, row);
            let (x, y) = source.fractional_index(lon, lat);
            *out = interpolate(self.config.interpolation, values, source.width, source.height, x, y);
        }
    }
}

fn copy_row(values: &[f32], source: &GridGeometry, col_offset: i64, row_offset: i64, row: usize, out_row: &mut [f32]) {
    let src_row = row as i64 + row_offset;
    if src_row < 0 || src_row >= source.height as i64 {
        return;
    }
    let base = src_row as usize * source.width;
    for (col, out) in out_row.iter_mut().enumerate() {
        let src_col = col as i64 + col_offset;
        if src_col >= 0 && src_col < source.width as i64 {
            *out = values[base + src_col as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downsample::AggregationMethod;
    use crate::types::InterpolationMethod;
    use series_common::BoundingBox;
    use test_utils::{assert_raster_eq, create_test_grid};

    fn region(data: Vec<f32>, width: usize, height: usize, bbox: BoundingBox) -> GridRegion {
        GridRegion::new(data, width, height, bbox).unwrap()
    }

    #[test]
    fn test_strategy_selection() {
        let source = GridGeometry::new(BoundingBox::new(0.0, 0.0, 3.0, 3.0), 9, 9);
        let coarse = GridGeometry::new(BoundingBox::new(0.0, 0.0, 3.0, 3.0), 3, 3);
        let fine = GridGeometry::new(BoundingBox::new(0.0, 0.0, 3.0, 3.0), 18, 18);
        let crop = GridGeometry::new(BoundingBox::new(1.0, 1.0, 2.0, 2.0), 3, 3);
        let shifted = GridGeometry::new(BoundingBox::new(0.1, 0.0, 3.1, 3.0), 9, 9);

        assert_eq!(ResampleStrategy::select(&source, &coarse), ResampleStrategy::Aggregate);
        assert_eq!(ResampleStrategy::select(&source, &fine), ResampleStrategy::Interpolate);
        assert_eq!(
            ResampleStrategy::select(&source, &crop),
            ResampleStrategy::Copy { col_offset: 3, row_offset: 3 }
        );
        assert_eq!(ResampleStrategy::select(&source, &shifted), ResampleStrategy::Interpolate);
    }

    #[test]
    fn test_same_grid_is_noop() {
        let data = create_test_grid(6, 4);
        let source = region(data.clone(), 6, 4, BoundingBox::new(10.0, 20.0, 13.0, 22.0));
        let out = Resampler::default()
            .resample(&source, &source.geometry(), &QualityMask::accept_all())
            .unwrap();
        assert_raster_eq!(out.data, data);
        assert_eq!(out.geometry(), source.geometry());
    }

    #[test]
    fn test_same_resolution_crop_copies_cells() {
        let data = create_test_grid(6, 4);
        let source = region(data, 6, 4, BoundingBox::new(0.0, 0.0, 6.0, 4.0));
        let target = GridGeometry::new(BoundingBox::new(2.0, 1.0, 4.0, 3.0), 2, 2);
        let out = Resampler::default()
            .resample(&source, &target, &QualityMask::accept_all())
            .unwrap();
        // col 2, row 1 of the source is the top-left of the crop
        assert_eq!(out.data, vec![2001.0, 3001.0, 2002.0, 3002.0]);
    }

    #[test]
    fn test_aggregate_mean_by_three() {
        let source = region((0..36).map(|i| i as f32).collect(), 6, 6, BoundingBox::new(0.0, 0.0, 6.0, 6.0));
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 6.0, 6.0), 2, 2);
        let out = Resampler::default()
            .resample(&source, &target, &QualityMask::accept_all())
            .unwrap();
        // top-left block: rows 0-2, cols 0-2 -> mean of 0,1,2,6,7,8,12,13,14 = 7
        assert_eq!(out.data, vec![7.0, 10.0, 25.0, 28.0]);
    }

    #[test]
    fn test_aggregate_applies_quality_mask_and_min_valid() {
        // left block: 5 valid of 9, right block: 4 valid of 9
        let data = vec![
            255.0, 255.0, 255.0, 255.0, 255.0, 255.0,
            255.0, 100.0, 100.0, 255.0, 255.0, 100.0,
            100.0, 100.0, 100.0, 100.0, 100.0, 100.0,
        ];
        let source = region(data, 6, 3, BoundingBox::new(0.0, 0.0, 6.0, 3.0));
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 6.0, 3.0), 2, 1);
        let mask = QualityMask::new(Some((0.0, 250.0)), vec![255.0]);

        let out = Resampler::default().resample(&source, &target, &mask).unwrap();
        assert_eq!(out.data[0], 100.0);
        assert!(out.data[1].is_nan());
    }

    #[test]
    fn test_aggregate_majority() {
        let config = ResampleConfig {
            aggregation: AggregationMethod::Majority,
            ..Default::default()
        };
        let source = region(vec![1.0, 2.0, 2.0, 3.0], 2, 2, BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 2.0, 2.0), 1, 1);
        let out = Resampler::new(config)
            .resample(&source, &target, &QualityMask::accept_all())
            .unwrap();
        assert_eq!(out.data, vec![2.0]);
    }

    #[test]
    fn test_upsample_nearest_replicates_cells() {
        let config = ResampleConfig {
            interpolation: InterpolationMethod::Nearest,
            ..Default::default()
        };
        let source = region(vec![1.0, 2.0, 3.0, 4.0], 2, 2, BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 2.0, 2.0), 4, 4);
        let out = Resampler::new(config)
            .resample(&source, &target, &QualityMask::accept_all())
            .unwrap();
        assert_eq!(
            out.data,
            vec![
                1.0, 1.0, 2.0, 2.0,
                1.0, 1.0, 2.0, 2.0,
                3.0, 3.0, 4.0, 4.0,
                3.0, 3.0, 4.0, 4.0,
            ]
        );
    }

    #[test]
    fn test_upsample_bilinear_is_smooth() {
        let source = region(vec![0.0, 10.0, 0.0, 10.0], 2, 2, BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let target = GridGeometry::new(BoundingBox::new(0.0, 0.0, 2.0, 2.0), 4, 4);
        let out = Resampler::default()
            .resample(&source, &target, &QualityMask::accept_all())
            .unwrap();
        // centres at x = 0.25, 0.75, 1.25, 1.75 -> fractional 0, 0.25, 0.75, 1 (after clamping)
        let row: Vec<f32> = out.data[..4].to_vec();
        assert_eq!(row, vec![0.0, 2.5, 7.5, 10.0]);
    }

    #[test]
    fn test_target_outside_source_is_nan() {
        let source = region(vec![5.0; 4], 2, 2, BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let target = GridGeometry::new(BoundingBox::new(1.0, 0.0, 3.0, 2.0), 2, 2);
        let out = Resampler::default()
            .resample(&source, &target, &QualityMask::accept_all())
            .unwrap();
        assert_eq!(out.data[0], 5.0);
        assert!(out.data[1].is_nan());
    }

    #[test]
    fn test_no_overlap_is_an_error() {
        let source = region(vec![1.0; 4], 2, 2, BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let target = GridGeometry::new(BoundingBox::new(10.0, 10.0, 12.0, 12.0), 2, 2);
        let result = Resampler::default().resample(&source, &target, &QualityMask::accept_all());
        assert!(matches!(result, Err(GridProcessorError::NoOverlap { .. })));
    }
}
