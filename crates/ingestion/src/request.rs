//! Validated assimilation requests.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use series_common::{
    BoundingBox, Cadence, DateRange, GridGeometry, NamingTemplate, Resolution, SeriesError, TargetGrid, TimeGrid,
    TimeStep,
};

use crate::config::RunOptions;
use crate::dataset::{DatasetBinding, TILE_PLACEHOLDER};
use crate::error::{IngestionError, Result};

/// Output naming used when the request does not set one.
pub const DEFAULT_NAMING: &str = "_CGLS_NDVI_$(yyyy)_$(mm)_d$(mdekad)";

/// Directory under the output directory used for staging by default.
pub const DEFAULT_STAGING_DIR: &str = ".staging";

/// Archive credentials. Passed through to the fetcher, never logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            token: None,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.token.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .finish()
    }
}

/// A fully validated request. Built once by [`RequestBuilder`] and never
/// changed during the run.
#[derive(Debug, Clone)]
pub struct AssimilationRequest {
    /// Datasets in priority order (first = highest).
    pub datasets: Vec<DatasetBinding>,
    pub resolution: Resolution,
    pub range: DateRange,
    pub cadence: Cadence,
    /// Area of interest as requested.
    pub aoi: BoundingBox,
    /// Area of interest snapped to the target grid.
    pub grid: GridGeometry,
    pub steps: Vec<TimeStep>,
    pub naming: NamingTemplate,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub credentials: Credentials,
    pub options: RunOptions,
}

impl AssimilationRequest {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Output name of `step` (without extension).
    pub fn output_name(&self, step: &TimeStep) -> Result<String> {
        Ok(self.naming.resolve(step, &[])?)
    }
}

/// Collects and validates the parts of an [`AssimilationRequest`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    datasets: Vec<DatasetBinding>,
    resolution: Option<Resolution>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    cadence: Option<Cadence>,
    aoi: Option<BoundingBox>,
    naming: Option<String>,
    output_dir: Option<PathBuf>,
    staging_dir: Option<PathBuf>,
    credentials: Credentials,
    options: RunOptions,
}

impl RequestBuilder {
    /// Append a dataset at the lowest priority so far.
    pub fn dataset(mut self, binding: DatasetBinding) -> Self {
        self.datasets.push(binding);
        self
    }

    pub fn datasets(mut self, bindings: impl IntoIterator<Item = DatasetBinding>) -> Self {
        self.datasets.extend(bindings);
        self
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = Some(cadence);
        self
    }

    pub fn aoi(mut self, aoi: BoundingBox) -> Self {
        self.aoi = Some(aoi);
        self
    }

    pub fn naming(mut self, template: impl Into<String>) -> Self {
        self.naming = Some(template.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<AssimilationRequest> {
        self.options.validate().map_err(IngestionError::invalid_config)?;
        validate_datasets(&self.datasets)?;

        let resolution = self
            .resolution
            .ok_or_else(|| IngestionError::invalid_config("target resolution is required"))?;
        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(IngestionError::invalid_config("begin and end dates are required")),
        };
        let range = DateRange::new(start, end)?;
        let cadence = self.cadence.unwrap_or(Cadence::Dekad);
        let steps = TimeGrid::for_range(&range, cadence);

        let aoi = self
            .aoi
            .ok_or_else(|| IngestionError::invalid_config("area of interest is required"))?
            .validated()?;
        let grid = TargetGrid::new(resolution).with_anchor(self.options.anchor).align(&aoi)?;

        let naming = NamingTemplate::parse(self.naming.as_deref().unwrap_or(DEFAULT_NAMING))?;
        validate_naming(&naming, &steps)?;

        let output_dir = self
            .output_dir
            .ok_or_else(|| IngestionError::invalid_config("output directory is required"))?;
        let staging_dir = self
            .staging_dir
            .unwrap_or_else(|| output_dir.join(DEFAULT_STAGING_DIR));

        Ok(AssimilationRequest {
            datasets: self.datasets,
            resolution,
            range,
            cadence,
            aoi,
            grid,
            steps,
            naming,
            output_dir,
            staging_dir,
            credentials: self.credentials,
            options: self.options,
        })
    }
}

fn validate_datasets(datasets: &[DatasetBinding]) -> Result<()> {
    if datasets.is_empty() {
        return Err(IngestionError::invalid_config("at least one dataset is required"));
    }

    let mut seen = HashSet::new();
    for binding in datasets {
        let dataset = &binding.dataset;
        if !seen.insert(dataset.id.as_str()) {
            return Err(IngestionError::invalid_config(format!(
                "dataset '{}' is listed more than once",
                dataset.id
            )));
        }
        if binding.mirrors.is_empty() {
            return Err(IngestionError::invalid_config(format!(
                "dataset '{}' has no mirror",
                dataset.id
            )));
        }

        let has_tile = dataset.datafile.placeholders().contains(&TILE_PLACEHOLDER);
        if has_tile == dataset.tiles.is_empty() {
            return Err(SeriesError::invalid_template(
                dataset.datafile.as_str(),
                format!(
                    "dataset '{}' declares {} tiles; $(tile) must appear exactly when tiles are declared",
                    dataset.id,
                    dataset.tiles.len()
                ),
            )
            .into());
        }
    }
    Ok(())
}

/// Every step must map to its own output name.
fn validate_naming(naming: &NamingTemplate, steps: &[TimeStep]) -> Result<()> {
    let mut names: HashMap<String, TimeStep> = HashMap::with_capacity(steps.len());
    for step in steps {
        let name = naming.resolve(step, &[])?;
        if let Some(previous) = names.insert(name.clone(), *step) {
            return Err(SeriesError::invalid_template(
                naming.as_str(),
                format!("steps {} and {} both map to '{}'", previous, step, name),
            )
            .into());
        }
    }
    Ok(())
}
