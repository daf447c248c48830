//! Aggregation of fine source cells into coarser target cells.
//!
//! The resampler gathers the source cells whose centres fall inside a target
//! cell's footprint and reduces them with one of these methods.

use serde::{Deserialize, Serialize};

/// Method used to reduce a footprint of source cells to one value.
///
/// - **Mean**: continuous indices (NDVI, LAI, FCOVER)
/// - **Majority**: categorical rasters (land cover classes)
/// - **Max**: peak-preserving composites
/// - **Nearest**: centre cell of the footprint, exact values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Mean,
    Majority,
    Max,
    Nearest,
}

impl AggregationMethod {
    /// Parse from string (case-insensitive), falling back to Mean.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "majority" | "mode" => Self::Majority,
            "max" | "maximum" => Self::Max,
            "nearest" => Self::Nearest,
            _ => Self::Mean,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Majority => "majority",
            Self::Max => "max",
            Self::Nearest => "nearest",
        }
    }
}

impl std::fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduce a row-major block of `block_width` columns to one value.
///
/// NaN cells are invalid. Returns NaN unless at least `min_valid` cells
/// (and at least one) are valid.
pub fn aggregate(block: &[f32], block_width: usize, method: AggregationMethod, min_valid: usize) -> f32 {
    let valid = block.iter().filter(|v| !v.is_nan()).count();
    if valid == 0 || valid < min_valid {
        return f32::NAN;
    }

    match method {
        AggregationMethod::Mean => mean_of_block(block, valid),
        AggregationMethod::Majority => majority_of_block(block),
        AggregationMethod::Max => max_of_block(block),
        AggregationMethod::Nearest => {
            let block_width = block_width.max(1);
            let block_height = block.len() / block_width;
            block
                .get((block_height / 2) * block_width + block_width / 2)
                .copied()
                .unwrap_or(f32::NAN)
        }
    }
}

/// Mean of the valid (non-NaN) values.
#[inline]
fn mean_of_block(block: &[f32], valid: usize) -> f32 {
    let sum: f64 = block.iter().filter(|v| !v.is_nan()).map(|&v| f64::from(v)).sum();
    (sum / valid as f64) as f32
}

/// Maximum of the valid (non-NaN) values.
#[inline]
fn max_of_block(block: &[f32]) -> f32 {
    block
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f32::NEG_INFINITY, f32::max)
}

/// Most frequent valid value; ties go to the smallest value.
fn majority_of_block(block: &[f32]) -> f32 {
    let mut values: Vec<f32> = block.iter().copied().filter(|v| !v.is_nan()).collect();
    values.sort_by(|a, b| a.total_cmp(b));

    let mut best = f32::NAN;
    let mut best_count = 0usize;
    let mut i = 0;
    while i < values.len() {
        let run = values[i..].iter().take_while(|v| **v == values[i]).count();
        if run > best_count {
            best = values[i];
            best_count = run;
        }
        i += run;
    }
    best
}
