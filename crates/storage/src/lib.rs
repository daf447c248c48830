//! Storage for the assimilation pipeline.
//!
//! Provides the staging cache that keeps scenes fetched from remote mirrors
//! on local disk, keyed by dataset, time step, mirror and file, with a
//! checksum manifest next to each file.

pub mod error;
pub mod staging;

pub use error::{StagingError, StagingResult};
pub use staging::{CacheKey, EntryManifest, StagingCache, StagingStats};
