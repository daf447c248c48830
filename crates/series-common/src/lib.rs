//! Common types and utilities shared across the raster time-series crates.

pub mod bbox;
pub mod error;
pub mod grid;
pub mod template;
pub mod time;

pub use bbox::BoundingBox;
pub use error::{SeriesError, SeriesResult};
pub use grid::{GridAnchor, GridGeometry, Resolution, TargetGrid};
pub use template::{NamingTemplate, TemplateMatch, TemplatePattern};
pub use time::{parse_date, Cadence, DateRange, TimeGrid, TimeStep};
