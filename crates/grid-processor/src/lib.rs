//! Raster processing for the time-series assimilation pipeline.
//!
//! Every raster is a north-up lat/lon [`GridRegion`]. The crate provides the
//! two CPU-bound stages that turn source scenes into output frames:
//!
//! ```text
//! scenes (native grid)
//!      │
//!      ▼
//! Mosaicker::merge  ── earlier scene wins per pixel, coverage on target grid
//!      │
//!      ▼
//! Resampler::resample
//!      │
//!      ├─► finer source:   aggregate footprint (mean / majority / max / nearest)
//!      ├─► coarser source: interpolate (nearest / bilinear / cubic)
//!      └─► same grid:      index copy
//!      │
//!      ▼
//! frame on the target grid
//! ```
//!
//! Decoded scenes can be memoized in a memory-bounded [`SceneCache`].

pub mod cache;
pub mod config;
pub mod downsample;
pub mod error;
pub mod interpolation;
pub mod mosaic;
pub mod resample;
pub mod types;

pub use cache::SceneCache;
pub use config::ResampleConfig;
pub use downsample::{aggregate, AggregationMethod};
pub use error::{GridProcessorError, Result};
pub use interpolation::{bilinear_interpolate, cubic_interpolate, interpolate, nearest_interpolate};
pub use mosaic::{Coverage, MissingRegion, Mosaic, Mosaicker};
pub use resample::{ResampleStrategy, Resampler};
pub use types::{CacheStats, GridRegion, InterpolationMethod, QualityMask};
