//! The temporal assimilation engine.
//!
//! Every step of the request runs its own [`StepMachine`]: datasets are
//! tried in priority order until one yields a frame, or the list runs out
//! and the step becomes a gap. Steps are independent and run on a bounded
//! pool; decoding, mosaicking and resampling happen on the blocking pool.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use grid_processor::{Coverage, GridRegion, Mosaicker, Resampler};
use serde::Serialize;
use series_common::{GridGeometry, TimeStep};
use storage::StagingCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::archive::{ArchiveReader, TiffArchive};
use crate::config::PartialCoveragePolicy;
use crate::dataset::{AccessMode, Dataset};
use crate::error::{IngestionError, Result};
use crate::fetch::{HttpFetcher, HttpFetcherConfig, RemoteFetcher};
use crate::request::AssimilationRequest;
use crate::resolver::{MirrorResolver, Resolution, Scene};
use crate::summary::{
    GapReason, GapRecord, OutputFrame, PartialCoverageWarning, RunSummary, SeriesEntry, StepOutcome,
};
use crate::writer::OutputWriter;

const CANCELLED_REASON: &str = "cancelled";

/// Where a step is in its search for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    /// Trying the dataset at this priority index.
    Searching { dataset: usize },
    /// The dataset at this index provided the frame.
    Resolved { dataset: usize },
    Gap,
}

/// Per-step state machine: `Pending -> Searching -> {Resolved, Gap}`.
#[derive(Debug, Clone)]
pub struct StepMachine {
    step: TimeStep,
    datasets: usize,
    state: StepState,
    contributors: Vec<usize>,
    failures: Vec<(usize, String)>,
}

impl StepMachine {
    pub fn new(step: TimeStep, datasets: usize) -> Self {
        Self {
            step,
            datasets,
            state: StepState::Pending,
            contributors: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn step(&self) -> TimeStep {
        self.step
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, StepState::Resolved { .. } | StepState::Gap)
    }

    pub fn start(&mut self) {
        if self.state == StepState::Pending {
            self.state = if self.datasets == 0 {
                StepState::Gap
            } else {
                StepState::Searching { dataset: 0 }
            };
        }
    }

    /// Priority index of the dataset to try next.
    pub fn current(&self) -> Option<usize> {
        match self.state {
            StepState::Searching { dataset } => Some(dataset),
            _ => None,
        }
    }

    /// The current dataset could not provide the step.
    pub fn on_failure(&mut self, reason: impl Into<String>) {
        if let Some(dataset) = self.current() {
            self.failures.push((dataset, reason.into()));
            self.advance(dataset);
        }
    }

    /// The current dataset produced data. Under `Fill` an incomplete frame
    /// keeps the search going for datasets that can fill the rest.
    pub fn on_coverage(&mut self, complete: bool, policy: PartialCoveragePolicy) {
        if let Some(dataset) = self.current() {
            self.contributors.push(dataset);
            if complete || policy == PartialCoveragePolicy::Accept {
                self.state = StepState::Resolved {
                    dataset: self.contributors[0],
                };
            } else {
                self.advance(dataset);
            }
        }
    }

    /// Stop searching; whatever has been gathered so far stands.
    pub fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        if let Some(dataset) = self.current() {
            self.failures.push((dataset, CANCELLED_REASON.to_string()));
        }
        self.state = self.settled();
    }

    /// Datasets that produced data, in priority order.
    pub fn contributors(&self) -> &[usize] {
        &self.contributors
    }

    /// Failures by dataset priority index.
    pub fn failures(&self) -> &[(usize, String)] {
        &self.failures
    }

    fn advance(&mut self, from: usize) {
        self.state = if from + 1 < self.datasets {
            StepState::Searching { dataset: from + 1 }
        } else {
            self.settled()
        };
    }

    fn settled(&self) -> StepState {
        match self.contributors.first() {
            Some(&dataset) => StepState::Resolved { dataset },
            None => StepState::Gap,
        }
    }
}

/// Frame under construction: the raster so far and which cells it covers.
struct Accumulator {
    raster: GridRegion,
    covered: Vec<bool>,
    sources: Vec<PathBuf>,
    filled_from: Vec<String>,
    /// Missing region reported by the winning dataset alone.
    winner_missing: Option<grid_processor::MissingRegion>,
}

impl Accumulator {
    fn new(raster: GridRegion, coverage: Coverage, scenes: &[Scene]) -> Self {
        let winner_missing = (!coverage.is_complete()).then(|| coverage.missing.clone());
        Self {
            raster,
            covered: coverage.mask,
            sources: scenes.iter().map(|s| s.path.clone()).collect(),
            filled_from: Vec::new(),
            winner_missing,
        }
    }

    /// Copy cells of `raster` into cells not yet covered.
    fn fill(&mut self, dataset_id: &str, raster: &GridRegion, coverage: &Coverage, scenes: &[Scene]) {
        let mut filled = 0usize;
        for (idx, covered) in self.covered.iter_mut().enumerate() {
            if !*covered && coverage.mask[idx] {
                self.raster.data[idx] = raster.data[idx];
                *covered = true;
                filled += 1;
            }
        }
        if filled > 0 {
            debug!(dataset = %dataset_id, cells = filled, "Filled uncovered cells");
            self.filled_from.push(dataset_id.to_string());
            self.sources.extend(scenes.iter().map(|s| s.path.clone()));
        }
    }

    fn is_complete(&self) -> bool {
        self.covered.iter().all(|c| *c)
    }
}

/// Availability of one step in a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub step: TimeStep,
    pub name: String,
    /// First dataset, by priority, listing a file for the step.
    pub dataset: Option<String>,
    /// A frame from an earlier run would be kept.
    pub reused: bool,
}

/// Runs an [`AssimilationRequest`].
pub struct AssimilationEngine {
    request: AssimilationRequest,
    staging: Arc<StagingCache>,
    resolver: MirrorResolver,
    archive: Arc<dyn ArchiveReader>,
    resampler: Resampler,
    writer: OutputWriter,
}

impl AssimilationEngine {
    /// Engine with the default collaborators: GeoTIFF archives and, when
    /// any mirror is remote, an HTTP fetcher using the request credentials.
    pub fn new(request: AssimilationRequest) -> Result<Self> {
        let has_remote = request
            .datasets
            .iter()
            .flat_map(|binding| binding.mirrors.iter())
            .any(|mirror| mirror.access_mode() == AccessMode::Remote);
        let fetcher: Option<Arc<dyn RemoteFetcher>> = if has_remote {
            Some(Arc::new(HttpFetcher::new(
                HttpFetcherConfig::default(),
                request.credentials.clone(),
            )?))
        } else {
            None
        };

        let staging = Arc::new(StagingCache::new(request.staging_dir.clone()));
        let archive = Arc::new(TiffArchive::new(request.options.resample.scene_cache_size_bytes()));
        let resampler = Resampler::new(request.options.resample.clone());
        let writer = OutputWriter::new(request.output_dir.clone(), request.options.gap_policy);

        Ok(Self {
            resolver: MirrorResolver::new(Arc::clone(&staging), fetcher),
            staging,
            archive,
            resampler,
            writer,
            request,
        })
    }

    /// Replace the remote fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.resolver = MirrorResolver::new(Arc::clone(&self.staging), Some(fetcher));
        self
    }

    /// Replace the archive reader.
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveReader>) -> Self {
        self.archive = archive;
        self
    }

    pub fn request(&self) -> &AssimilationRequest {
        &self.request
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    /// Produce one frame or gap per requested step.
    ///
    /// Per-step failures never abort the run. Once `cancel` fires (or the
    /// deadline passes) steps not yet finished become gaps.
    #[instrument(skip_all, fields(steps = self.request.steps.len(), datasets = self.request.datasets.len()))]
    pub async fn run(&self, cancel: &CancellationToken) -> RunSummary {
        let started_at = Utc::now();
        let token = cancel.child_token();

        let deadline = self.request.options.deadline.map(|deadline| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline_secs = deadline.as_secs(), "Deadline reached, cancelling run");
                token.cancel();
            })
        });

        info!(
            start = %self.request.range.start,
            end = %self.request.range.end,
            cadence = %self.request.cadence,
            width = self.request.grid.width,
            height = self.request.grid.height,
            workers = self.request.options.workers,
            "Starting assimilation run"
        );

        let entries: Vec<SeriesEntry> = stream::iter(self.request.steps.iter().copied())
            .map(|step| self.process_step(step, &token))
            .buffer_unordered(self.request.options.workers)
            .collect()
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        let summary = RunSummary::new(started_at, entries, token.is_cancelled(), self.staging.stats());
        info!(
            written = summary.written,
            reused = summary.reused,
            gaps = summary.gaps,
            partial = summary.partial,
            fetches = summary.staging.fetches,
            cancelled = summary.cancelled,
            "Assimilation run finished"
        );
        summary
    }

    async fn process_step(&self, step: TimeStep, cancel: &CancellationToken) -> SeriesEntry {
        let name = self.request.output_name(&step).unwrap_or_else(|_| step.label());

        if !self.request.options.overwrite {
            if let Some(provenance) = self.writer.existing(&name) {
                debug!(step = %step, dataset = %provenance.dataset, "Reusing existing frame");
                return SeriesEntry {
                    step,
                    outcome: StepOutcome::Reused {
                        path: self.writer.frame_path(&name),
                        dataset: provenance.dataset,
                    },
                    name,
                };
            }
        }

        let datasets = &self.request.datasets;
        let mut machine = StepMachine::new(step, datasets.len());
        let mut frame: Option<Accumulator> = None;
        machine.start();

        while let Some(idx) = machine.current() {
            if cancel.is_cancelled() {
                machine.cancel();
                break;
            }
            let binding = &datasets[idx];

            let scenes = match self.resolver.resolve(binding, &step, cancel).await {
                Ok(Resolution::Found(scenes)) => scenes,
                Ok(Resolution::NotFound { attempts }) => {
                    machine.on_failure(format!("no source file ({})", attempts.join("; ")));
                    continue;
                }
                Err(IngestionError::Cancelled) => {
                    machine.cancel();
                    break;
                }
                Err(err) => {
                    machine.on_failure(err.to_string());
                    continue;
                }
            };

            let built = self.build(Arc::clone(&binding.dataset), scenes.clone()).await;
            let (raster, coverage) = match built {
                Ok(built) => built,
                Err(err) => {
                    warn!(step = %step, dataset = %binding.id(), error = %err, "Dataset unusable, trying next");
                    machine.on_failure(err.to_string());
                    continue;
                }
            };

            let complete = match frame.as_mut() {
                None => {
                    let acc = Accumulator::new(raster, coverage, &scenes);
                    let complete = acc.is_complete();
                    frame = Some(acc);
                    complete
                }
                Some(acc) => {
                    acc.fill(binding.id(), &raster, &coverage, &scenes);
                    acc.is_complete()
                }
            };
            machine.on_coverage(complete, self.request.options.partial_coverage);
        }

        match (machine.state(), frame) {
            (StepState::Resolved { dataset }, Some(acc)) => {
                self.emit_frame(step, name, &datasets[dataset].dataset, acc).await
            }
            _ => self.emit_gap(step, name, &machine).await,
        }
    }

    /// Decode, mosaic and resample the scenes of one dataset.
    async fn build(&self, dataset: Arc<Dataset>, scenes: Vec<Scene>) -> Result<(GridRegion, Coverage)> {
        let archive = Arc::clone(&self.archive);
        let resampler = self.resampler.clone();
        let grid = self.request.grid;

        tokio::task::spawn_blocking(move || build_frame(archive.as_ref(), &resampler, &dataset, &scenes, &grid))
            .await
            .map_err(|e| IngestionError::Task(e.to_string()))?
            .map_err(IngestionError::from)
    }

    async fn emit_frame(&self, step: TimeStep, name: String, winner: &Dataset, acc: Accumulator) -> SeriesEntry {
        let warning = if acc.is_complete() {
            None
        } else {
            let missing = if acc.filled_from.is_empty() {
                acc.winner_missing.clone().unwrap_or_default()
            } else {
                Coverage::from_mask(&self.request.grid, acc.covered.clone()).missing
            };
            warn!(
                step = %step,
                dataset = %winner.id,
                missing_cells = missing.missing_cells,
                total_cells = missing.total_cells,
                "Partial coverage"
            );
            Some(PartialCoverageWarning {
                dataset_id: winner.id.clone(),
                missing,
            })
        };

        let frame = OutputFrame {
            step,
            name: name.clone(),
            dataset_id: winner.id.clone(),
            filled_from: acc.filled_from,
            raster: acc.raster,
            warning,
            sources: acc.sources,
        };

        let writer = self.writer.clone();
        let written = tokio::task::spawn_blocking(move || writer.write_frame(&frame).map(|path| (path, frame)))
            .await
            .map_err(|e| IngestionError::Task(e.to_string()))
            .and_then(|result| result);

        match written {
            Ok((path, frame)) => SeriesEntry {
                step,
                name,
                outcome: StepOutcome::Written {
                    path,
                    dataset: frame.dataset_id,
                    filled_from: frame.filled_from,
                    partial_coverage: frame.warning,
                },
            },
            Err(err) => {
                warn!(step = %step, error = %err, "Failed to write frame");
                let mut gap = GapRecord::new(step, name);
                gap.push(winner.id.clone(), format!("write failed: {}", err));
                self.record_gap(gap)
            }
        }
    }

    async fn emit_gap(&self, step: TimeStep, name: String, machine: &StepMachine) -> SeriesEntry {
        let mut gap = GapRecord::new(step, name);
        for (idx, reason) in machine.failures() {
            gap.push(self.request.datasets[*idx].id(), reason.clone());
        }
        if machine.failures().is_empty() {
            gap.push("", CANCELLED_REASON);
        }
        self.record_gap(gap)
    }

    fn record_gap(&self, gap: GapRecord) -> SeriesEntry {
        let marker = match self.writer.write_gap(&gap) {
            Ok(marker) => marker,
            Err(err) => {
                warn!(step = %gap.step, error = %err, "Failed to write gap marker");
                None
            }
        };
        SeriesEntry {
            step: gap.step,
            name: gap.name,
            outcome: StepOutcome::Gap {
                reasons: gap.reasons,
                marker,
            },
        }
    }

    /// Which dataset each step would come from, judged by listings only.
    /// Nothing is fetched or written.
    pub async fn plan(&self) -> Vec<PlannedStep> {
        let mut available: Vec<HashSet<TimeStep>> = Vec::with_capacity(self.request.datasets.len());
        for binding in &self.request.datasets {
            let steps = self.resolver.list_available(binding).await;
            debug!(dataset = %binding.id(), steps = steps.len(), "Listed availability");
            available.push(steps.into_iter().collect());
        }

        self.request
            .steps
            .iter()
            .map(|step| {
                let name = self.request.output_name(step).unwrap_or_else(|_| step.label());
                let dataset = self
                    .request
                    .datasets
                    .iter()
                    .zip(&available)
                    .find(|(binding, listed)| {
                        binding
                            .dataset
                            .candidates(step)
                            .iter()
                            .any(|candidate| listed.contains(&candidate.native_step))
                    })
                    .map(|(binding, _)| binding.id().to_string());
                PlannedStep {
                    step: *step,
                    reused: self.writer.existing(&name).is_some(),
                    name,
                    dataset,
                }
            })
            .collect()
    }
}

fn build_frame(
    archive: &dyn ArchiveReader,
    resampler: &Resampler,
    dataset: &Dataset,
    scenes: &[Scene],
    grid: &GridGeometry,
) -> grid_processor::Result<(GridRegion, Coverage)> {
    let rasters = scenes
        .iter()
        .map(|scene| archive.open_raster(&scene.path, dataset))
        .collect::<grid_processor::Result<Vec<_>>>()?;
    let mosaic = Mosaicker::new().merge(&rasters, grid)?;
    let raster = resampler.resample(&mosaic.raster, grid, &dataset.quality)?;
    Ok((raster, mosaic.coverage))
}

/// Reasons grouped by dataset, as printed in gap reports.
pub fn describe_gap(reasons: &[GapReason]) -> String {
    reasons
        .iter()
        .map(|r| {
            if r.dataset_id.is_empty() {
                r.reason.clone()
            } else {
                format!("{}: {}", r.dataset_id, r.reason)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_common::{parse_date, Cadence};

    fn step() -> TimeStep {
        TimeStep::containing(parse_date("2020-06-21").unwrap(), Cadence::Dekad)
    }

    #[test]
    fn test_first_success_wins() {
        let mut machine = StepMachine::new(step(), 3);
        assert_eq!(machine.state(), StepState::Pending);
        machine.start();
        assert_eq!(machine.current(), Some(0));
        machine.on_failure("not found");
        assert_eq!(machine.current(), Some(1));
        machine.on_coverage(true, PartialCoveragePolicy::Accept);
        assert_eq!(machine.state(), StepState::Resolved { dataset: 1 });
        assert_eq!(machine.failures().len(), 1);
    }

    #[test]
    fn test_exhaustion_is_gap() {
        let mut machine = StepMachine::new(step(), 2);
        machine.start();
        machine.on_failure("a");
        machine.on_failure("b");
        assert_eq!(machine.state(), StepState::Gap);
        assert!(machine.is_terminal());

        // Terminal states ignore further events.
        machine.on_coverage(true, PartialCoveragePolicy::Accept);
        assert_eq!(machine.state(), StepState::Gap);
    }

    #[test]
    fn test_no_datasets_is_gap() {
        let mut machine = StepMachine::new(step(), 0);
        machine.start();
        assert_eq!(machine.state(), StepState::Gap);
    }

    #[test]
    fn test_partial_accept_stops_search() {
        let mut machine = StepMachine::new(step(), 2);
        machine.start();
        machine.on_coverage(false, PartialCoveragePolicy::Accept);
        assert_eq!(machine.state(), StepState::Resolved { dataset: 0 });
    }

    #[test]
    fn test_partial_fill_continues_and_keeps_winner() {
        let mut machine = StepMachine::new(step(), 3);
        machine.start();
        machine.on_coverage(false, PartialCoveragePolicy::Fill);
        assert_eq!(machine.current(), Some(1));
        machine.on_failure("not found");
        machine.on_coverage(false, PartialCoveragePolicy::Fill);
        assert_eq!(machine.state(), StepState::Resolved { dataset: 0 });
        assert_eq!(machine.contributors(), &[0, 2]);
    }

    #[test]
    fn test_cancel_mid_search() {
        let mut machine = StepMachine::new(step(), 2);
        machine.start();
        machine.cancel();
        assert_eq!(machine.state(), StepState::Gap);
        assert_eq!(machine.failures(), &[(0, CANCELLED_REASON.to_string())]);

        let mut machine = StepMachine::new(step(), 2);
        machine.start();
        machine.on_coverage(false, PartialCoveragePolicy::Fill);
        machine.cancel();
        assert_eq!(machine.state(), StepState::Resolved { dataset: 0 });
    }

    #[test]
    fn test_describe_gap() {
        let reasons = vec![
            GapReason {
                dataset_id: "A".into(),
                reason: "not found".into(),
            },
            GapReason {
                dataset_id: String::new(),
                reason: CANCELLED_REASON.into(),
            },
        ];
        assert_eq!(describe_gap(&reasons), "A: not found; cancelled");
    }
}
