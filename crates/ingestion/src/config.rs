//! Run options for the assimilation engine.

use std::time::Duration;

use grid_processor::ResampleConfig;
use serde::{Deserialize, Serialize};
use series_common::GridAnchor;

/// What to emit for a step without a usable source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Record the gap in the run summary only.
    #[default]
    Skip,
    /// Also write a `<name>.gap.json` marker next to where the frame would be.
    Marker,
}

impl GapPolicy {
    /// Parse from string (case-insensitive), falling back to Skip.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "marker" | "mark" => Self::Marker,
            _ => Self::Skip,
        }
    }
}

/// What to do when the winning dataset covers only part of the area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialCoveragePolicy {
    /// Emit the frame with a coverage warning.
    #[default]
    Accept,
    /// Keep walking the datasets and fill only still-uncovered cells.
    Fill,
}

impl PartialCoveragePolicy {
    /// Parse from string (case-insensitive), falling back to Accept.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fill" => Self::Fill,
            _ => Self::Accept,
        }
    }
}

/// Options of an assimilation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of steps processed concurrently.
    pub workers: usize,
    /// Wall-clock budget of the run; steps not started in time become gaps.
    pub deadline: Option<Duration>,
    pub gap_policy: GapPolicy,
    pub partial_coverage: PartialCoveragePolicy,
    /// Rebuild frames that already exist in the output directory.
    pub overwrite: bool,
    pub resample: ResampleConfig,
    /// Pixel-centre anchor shared by the target and native grids.
    pub anchor: GridAnchor,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline: None,
            gap_policy: GapPolicy::Skip,
            partial_coverage: PartialCoveragePolicy::Accept,
            overwrite: false,
            resample: ResampleConfig::default(),
            anchor: GridAnchor::default(),
        }
    }
}

impl RunOptions {
    /// Load options from environment variables.
    pub fn from_env() -> Self {
        let mut options = Self {
            resample: ResampleConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("ASSIMILATION_WORKERS") {
            if let Ok(workers) = val.parse() {
                options.workers = workers;
            }
        }

        if let Ok(val) = std::env::var("ASSIMILATION_DEADLINE_SECS") {
            if let Ok(secs) = val.parse() {
                options.deadline = Some(Duration::from_secs(secs));
            }
        }

        if let Ok(val) = std::env::var("GAP_POLICY") {
            options.gap_policy = GapPolicy::from_str(&val);
        }

        if let Ok(val) = std::env::var("PARTIAL_COVERAGE") {
            options.partial_coverage = PartialCoveragePolicy::from_str(&val);
        }

        if let Ok(val) = std::env::var("OVERWRITE_OUTPUTS") {
            options.overwrite = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        options
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }

        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err("deadline must be > 0".to_string());
        }

        if !(self.anchor.lon.is_finite() && self.anchor.lat.is_finite()) {
            return Err("grid anchor must be finite".to_string());
        }

        self.resample.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RunOptions::default();
        assert_eq!(options.workers, 4);
        assert_eq!(options.gap_policy, GapPolicy::Skip);
        assert_eq!(options.partial_coverage, PartialCoveragePolicy::Accept);
        assert!(!options.overwrite);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let options = RunOptions {
            workers: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = RunOptions {
            deadline: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(GapPolicy::from_str("MARKER"), GapPolicy::Marker);
        assert_eq!(GapPolicy::from_str("other"), GapPolicy::Skip);
        assert_eq!(PartialCoveragePolicy::from_str("fill"), PartialCoveragePolicy::Fill);
        assert_eq!(PartialCoveragePolicy::from_str("accept"), PartialCoveragePolicy::Accept);
    }
}
