//! Configuration for resampling.

use crate::downsample::AggregationMethod;
use crate::types::InterpolationMethod;
use serde::{Deserialize, Serialize};

/// Configuration for the resampler and the scene cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleConfig {
    /// Method used when the target grid is finer than the source.
    pub interpolation: InterpolationMethod,

    /// Method used when the target grid is coarser than the source.
    pub aggregation: AggregationMethod,

    /// Share of a footprint's source cells that must be valid for an
    /// aggregated cell to carry data (0.5 requires 5 of 9 at factor 3).
    pub min_valid_fraction: f32,

    /// Memory budget for decoded scenes in megabytes.
    pub scene_cache_size_mb: usize,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            interpolation: InterpolationMethod::Bilinear,
            aggregation: AggregationMethod::Mean,
            min_valid_fraction: 0.5,
            scene_cache_size_mb: 512,
        }
    }
}

impl ResampleConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GRID_INTERPOLATION") {
            config.interpolation = InterpolationMethod::from_str(&val);
        }

        if let Ok(val) = std::env::var("GRID_AGGREGATION") {
            config.aggregation = AggregationMethod::from_str(&val);
        }

        if let Ok(val) = std::env::var("MIN_VALID_FRACTION") {
            if let Ok(fraction) = val.parse() {
                config.min_valid_fraction = fraction;
            }
        }

        if let Ok(val) = std::env::var("SCENE_CACHE_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.scene_cache_size_mb = size;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_valid_fraction) {
            return Err("min_valid_fraction must be within 0.0-1.0".to_string());
        }

        if self.scene_cache_size_mb == 0 {
            return Err("scene_cache_size_mb must be > 0".to_string());
        }

        Ok(())
    }

    /// Minimum number of valid cells for a footprint of `footprint` cells.
    pub fn min_valid_cells(&self, footprint: usize) -> usize {
        ((self.min_valid_fraction as f64 * footprint as f64).ceil() as usize).max(1)
    }

    /// Get the scene cache size in bytes.
    pub fn scene_cache_size_bytes(&self) -> usize {
        self.scene_cache_size_mb * 1024 * 1024
    }
}
