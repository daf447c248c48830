//! Run results: frames, gaps and the summary of a whole run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use grid_processor::{GridRegion, MissingRegion};
use serde::{Deserialize, Serialize};
use series_common::{GridGeometry, TimeStep};
use storage::StagingStats;

/// The winning dataset covered only part of the area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCoverageWarning {
    pub dataset_id: String,
    pub missing: MissingRegion,
}

/// A resampled, cropped raster on the target grid for one step.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub step: TimeStep,
    /// Output name without extension.
    pub name: String,
    /// Dataset that won the step.
    pub dataset_id: String,
    /// Lower-priority datasets that filled uncovered cells.
    pub filled_from: Vec<String>,
    pub raster: GridRegion,
    pub warning: Option<PartialCoverageWarning>,
    /// Source files the frame was built from.
    pub sources: Vec<PathBuf>,
}

/// Why one dataset could not provide a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReason {
    pub dataset_id: String,
    pub reason: String,
}

/// A step no dataset could provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRecord {
    pub step: TimeStep,
    pub name: String,
    pub reasons: Vec<GapReason>,
}

impl GapRecord {
    pub fn new(step: TimeStep, name: impl Into<String>) -> Self {
        Self {
            step,
            name: name.into(),
            reasons: Vec::new(),
        }
    }

    pub fn push(&mut self, dataset_id: impl Into<String>, reason: impl Into<String>) {
        self.reasons.push(GapReason {
            dataset_id: dataset_id.into(),
            reason: reason.into(),
        });
    }
}

/// Provenance sidecar written next to every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameProvenance {
    pub step: TimeStep,
    pub label: String,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filled_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_coverage: Option<PartialCoverageWarning>,
    pub grid: GridGeometry,
    pub sources: Vec<PathBuf>,
}

impl FrameProvenance {
    pub fn of(frame: &OutputFrame) -> Self {
        Self {
            step: frame.step,
            label: frame.step.label(),
            dataset: frame.dataset_id.clone(),
            filled_from: frame.filled_from.clone(),
            partial_coverage: frame.warning.clone(),
            grid: frame.raster.geometry(),
            sources: frame.sources.clone(),
        }
    }
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    /// A new frame was written.
    Written {
        path: PathBuf,
        dataset: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        filled_from: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_coverage: Option<PartialCoverageWarning>,
    },
    /// The frame of an earlier run was kept.
    Reused { path: PathBuf, dataset: String },
    Gap {
        reasons: Vec<GapReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker: Option<PathBuf>,
    },
}

/// One step of the produced time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub step: TimeStep,
    pub name: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

impl SeriesEntry {
    pub fn is_gap(&self) -> bool {
        matches!(self.outcome, StepOutcome::Gap { .. })
    }

    /// Dataset that provided the step, if any.
    pub fn dataset(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Written { dataset, .. } | StepOutcome::Reused { dataset, .. } => Some(dataset),
            StepOutcome::Gap { .. } => None,
        }
    }
}

/// Result of a run, one entry per step in step order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<SeriesEntry>,
    pub written: usize,
    pub reused: usize,
    pub gaps: usize,
    pub partial: usize,
    pub cancelled: bool,
    pub staging: StagingStats,
}

impl RunSummary {
    pub fn new(
        started_at: DateTime<Utc>,
        mut entries: Vec<SeriesEntry>,
        cancelled: bool,
        staging: StagingStats,
    ) -> Self {
        entries.sort_by_key(|entry| entry.step);

        let mut summary = Self {
            started_at,
            finished_at: Utc::now(),
            entries: Vec::new(),
            written: 0,
            reused: 0,
            gaps: 0,
            partial: 0,
            cancelled,
            staging,
        };
        for entry in &entries {
            match &entry.outcome {
                StepOutcome::Written { partial_coverage, .. } => {
                    summary.written += 1;
                    if partial_coverage.is_some() {
                        summary.partial += 1;
                    }
                }
                StepOutcome::Reused { .. } => summary.reused += 1,
                StepOutcome::Gap { .. } => summary.gaps += 1,
            }
        }
        summary.entries = entries;
        summary
    }

    pub fn entry(&self, step: &TimeStep) -> Option<&SeriesEntry> {
        self.entries
            .binary_search_by_key(step, |entry| entry.step)
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_common::{parse_date, Cadence};

    fn step(date: &str) -> TimeStep {
        TimeStep::containing(parse_date(date).unwrap(), Cadence::Dekad)
    }

    #[test]
    fn test_summary_sorts_and_counts() {
        let entries = vec![
            SeriesEntry {
                step: step("2020-07-01"),
                name: "b".into(),
                outcome: StepOutcome::Gap {
                    reasons: vec![GapReason {
                        dataset_id: "A".into(),
                        reason: "not found".into(),
                    }],
                    marker: None,
                },
            },
            SeriesEntry {
                step: step("2020-06-21"),
                name: "a".into(),
                outcome: StepOutcome::Written {
                    path: PathBuf::from("/out/a.tif"),
                    dataset: "A".into(),
                    filled_from: Vec::new(),
                    partial_coverage: None,
                },
            },
        ];

        let summary = RunSummary::new(Utc::now(), entries, false, StagingStats::default());
        assert_eq!(summary.entries[0].name, "a");
        assert_eq!((summary.written, summary.reused, summary.gaps), (1, 0, 1));
        assert_eq!(summary.entry(&step("2020-06-21")).unwrap().dataset(), Some("A"));
        assert!(summary.entry(&step("2020-07-01")).unwrap().is_gap());
        assert!(summary.entry(&step("2020-07-11")).is_none());
    }

    #[test]
    fn test_entry_serializes_with_status_tag() {
        let entry = SeriesEntry {
            step: step("2020-06-21"),
            name: "a".into(),
            outcome: StepOutcome::Reused {
                path: PathBuf::from("/out/a.tif"),
                dataset: "A".into(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "reused");
        assert_eq!(json["dataset"], "A");
    }
}
