//! Shared test utilities for the raster time-series workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Deterministic raster generators
//! - NDVI quality fixtures
//! - Scratch directories
//! - A NaN-aware raster assertion macro
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

/// Creates a scratch directory that is removed when dropped.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("series-test-")
        .tempdir()
        .expect("failed to create scratch directory")
}

/// Asserts two rasters are equal cell by cell, treating NaN as equal to NaN.
#[macro_export]
macro_rules! assert_raster_eq {
    ($left:expr, $right:expr) => {{
        let left: &[f32] = &$left;
        let right: &[f32] = &$right;
        assert_eq!(left.len(), right.len(), "raster lengths differ");
        for (i, (a, b)) in left.iter().zip(right.iter()).enumerate() {
            if !(a == b || (a.is_nan() && b.is_nan())) {
                panic!("rasters differ at cell {}: {:?} != {:?}", i, a, b);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_raster_eq_treats_nan_as_equal() {
        assert_raster_eq!(vec![1.0f32, f32::NAN], vec![1.0f32, f32::NAN]);
    }

    #[test]
    #[should_panic(expected = "rasters differ")]
    fn test_assert_raster_eq_detects_difference() {
        assert_raster_eq!(vec![1.0f32, 2.0], vec![1.0f32, f32::NAN]);
    }
}
