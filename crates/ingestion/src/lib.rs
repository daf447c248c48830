//! Temporal assimilation of prioritized raster archives.
//!
//! Turns a list of source datasets, each available from one or more
//! mirrors, into a regular time series of frames on one target grid.
//!
//! # Architecture
//!
//! ```text
//! AssimilationRequest ──► AssimilationEngine::run
//!                              │ per step (bounded pool)
//!                              ▼
//!                         MirrorResolver ──► local mirror
//!                              │        └──► RemoteFetcher ──► StagingCache
//!                              ▼
//!                         ArchiveReader ──► Mosaicker ──► Resampler
//!                              │
//!                              ▼
//!                         OutputWriter (frame + sidecars, or gap)
//! ```
//!
//! Datasets are tried in priority order for every step; the first one that
//! yields data wins, and a step no dataset can provide is recorded as a gap.

pub mod archive;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod request;
pub mod resolver;
pub mod summary;
pub mod writer;

// Re-exports
pub use archive::{list_available, read_geotiff, ArchiveReader, AvailableFile, TiffArchive};
pub use config::{GapPolicy, PartialCoveragePolicy, RunOptions};
pub use dataset::{AccessMode, Candidate, Dataset, DatasetBinding, ManifestSpec, Mirror, MirrorLocation};
pub use engine::{describe_gap, AssimilationEngine, PlannedStep, StepMachine, StepState};
pub use error::{FetchError, IngestionError, Result};
pub use fetch::{HttpFetcher, HttpFetcherConfig, RemoteFetcher};
pub use request::{AssimilationRequest, Credentials, RequestBuilder, DEFAULT_NAMING};
pub use resolver::{MirrorResolver, Scene};
pub use summary::{
    FrameProvenance, GapReason, GapRecord, OutputFrame, PartialCoverageWarning, RunSummary, SeriesEntry,
    StepOutcome,
};
pub use writer::{write_geotiff, OutputWriter};
