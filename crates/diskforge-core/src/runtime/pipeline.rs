use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::catalog::DiskFormat;
use crate::events::EventSender;
use crate::runtime::artifact::{Artifact, ArtifactRole};
use crate::runtime::progress::{ProgressTracker, human_size};
use crate::runtime::runner::{ToolOutput, ToolRunner, command_line, run_tool};
use crate::runtime::stage::StageSpec;
use crate::runtime::types::ConvertError;

pub const VALIDATE_LABEL: &str = "Validate source";
pub const VERIFY_LABEL: &str = "Verify output";

/// Allowed deviation of a pipeline's total weight from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// An ordered list of stages performing one logical conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub name: String,
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.stages.iter().map(|s| s.weight).sum()
    }

    /// Every stage owns a positive slice and the slices cover 0..=100.
    pub fn has_valid_weights(&self) -> bool {
        !self.stages.is_empty()
            && self.stages.iter().all(|s| s.weight.is_finite() && s.weight > 0.0)
            && (self.total_weight() - 1.0).abs() <= WEIGHT_TOLERANCE
    }

    /// Reject a pipeline that could not report progress up to 100%.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.has_valid_weights() {
            return Ok(());
        }
        let weights: Vec<String> = self.stages.iter().map(|s| s.weight.to_string()).collect();
        Err(ConvertError::InvalidPipeline {
            name: self.name.clone(),
            reason: format!(
                "stage weights [{}] must be positive and sum to 1",
                weights.join(", ")
            ),
        })
    }

    /// Format of the final output.
    pub fn output_format(&self) -> Option<DiskFormat> {
        self.stages.last().map(|s| s.output_format)
    }

    /// Display labels for every step a run goes through, indexed the same
    /// way as [`Event::Stage`](crate::events::Event::Stage).
    pub fn step_labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.stages.len() + 2);
        labels.push(VALIDATE_LABEL.to_string());
        labels.extend(self.stages.iter().map(|s| s.label.clone()));
        labels.push(VERIFY_LABEL.to_string());
        labels
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    ValidatingSource,
    RunningStage(usize),
    VerifyingOutput,
    Done,
    Failed,
}

/// Mutable bookkeeping of one in-flight conversion.
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: RunPhase,
    pub started: Instant,
    pub last_percent: f64,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: RunPhase::NotStarted,
            started: Instant::now(),
            last_percent: 0.0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, RunPhase::Done | RunPhase::Failed)
    }
}

/// Executes a [`PipelineSpec`] once, synchronously, reporting through
/// `events`. Blocks for as long as the tool runs.
pub struct PipelineRun<'a> {
    spec: &'a PipelineSpec,
    source: Artifact,
    destination: Artifact,
    runner: &'a dyn ToolRunner,
    events: &'a EventSender,
    state: RunState,
    tracker: ProgressTracker,
    /// Intermediates created by this run and not yet deleted.
    live: Vec<Artifact>,
}

impl<'a> PipelineRun<'a> {
    pub fn new(
        spec: &'a PipelineSpec,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        runner: &'a dyn ToolRunner,
        events: &'a EventSender,
    ) -> Self {
        Self {
            spec,
            source: Artifact::source(source),
            destination: Artifact::destination(destination),
            runner,
            events,
            state: RunState::new(),
            tracker: ProgressTracker::new(),
            live: Vec::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run every stage in order. Returns the size of the output file.
    ///
    /// Intermediates are removed on every exit path.
    pub fn execute(&mut self) -> Result<u64, ConvertError> {
        let result = self.drive();
        self.cleanup();
        self.state.phase = if result.is_ok() {
            RunPhase::Done
        } else {
            RunPhase::Failed
        };
        info!(
            pipeline = %self.spec.name,
            success = result.is_ok(),
            elapsed_ms = self.state.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        result
    }

    fn drive(&mut self) -> Result<u64, ConvertError> {
        self.validate_source()?;

        let spec = self.spec;
        let last = spec.stages.len().saturating_sub(1);
        let mut offset = 0.0;
        let mut input = self.source.clone();

        for (index, stage) in spec.stages.iter().enumerate() {
            self.state.phase = RunPhase::RunningStage(index);
            self.events.stage(index + 1, stage.label.clone());

            let output = if index == last {
                self.destination.clone()
            } else {
                Artifact::intermediate(self.destination.path(), index + 1, stage.output_format)
            };
            if output.role() == ArtifactRole::Intermediate {
                self.live.push(output.clone());
            }

            self.run_stage(index, stage, offset, &input, &output)?;

            if input.role() == ArtifactRole::Intermediate {
                self.discard(&input);
            }
            offset += stage.weight;
            input = output;
        }

        self.verify_output()
    }

    fn validate_source(&mut self) -> Result<(), ConvertError> {
        self.state.phase = RunPhase::ValidatingSource;
        self.events.stage(0, VALIDATE_LABEL);

        if !self.source.exists() {
            return Err(ConvertError::SourceNotFound {
                path: self.source.path().to_path_buf(),
            });
        }
        let size = self.source.size()?;
        self.events.info(format!(
            "Validated source {} ({})",
            self.source.path().display(),
            human_size(size)
        ));
        Ok(())
    }

    fn run_stage(
        &mut self,
        index: usize,
        stage: &StageSpec,
        offset: f64,
        input: &Artifact,
        output: &Artifact,
    ) -> Result<(), ConvertError> {
        let args = stage.resolve_args(input.path(), output.path());
        let runner = self.runner;
        let events = self.events;

        events.log(command_line(runner.program(), &args));
        info!(stage_index = index, label = %stage.label, weight = stage.weight, "stage started");

        self.tracker.begin_stage(offset, stage.weight);
        let tracker = &mut self.tracker;
        let status = run_tool(runner, &args, &mut |out| match out {
            ToolOutput::Line(line) => events.log(line),
            ToolOutput::Progress(local) => {
                let update = tracker.sample(local);
                events.progress(update.percent, update.remaining);
            }
        });
        self.state.last_percent = self.tracker.last_percent();

        status.into_result().inspect_err(|e| {
            warn!(stage_index = index, error = %e, "stage failed");
        })
    }

    fn verify_output(&mut self) -> Result<u64, ConvertError> {
        self.state.phase = RunPhase::VerifyingOutput;
        self.events.stage(self.spec.stages.len() + 1, VERIFY_LABEL);

        if !self.destination.exists() {
            return Err(ConvertError::OutputVerificationFailed {
                path: self.destination.path().to_path_buf(),
            });
        }
        let size = self.destination.size()?;

        if self.tracker.last_percent() < 100.0 {
            self.events.progress(100.0, Some(Duration::ZERO));
            self.state.last_percent = 100.0;
        }
        self.events.ok(format!(
            "Output generated: {} ({})",
            self.destination.path().display(),
            human_size(size)
        ));
        Ok(size)
    }

    /// Best-effort removal of one intermediate. Never fails the run.
    fn discard(&mut self, artifact: &Artifact) {
        self.live.retain(|a| a != artifact);
        match artifact.remove() {
            Ok(()) => {
                debug!(path = %artifact.path().display(), "intermediate removed");
                self.events
                    .log(format!("Removed {}", artifact.path().display()));
            }
            Err(e) => {
                warn!(path = %artifact.path().display(), error = %e, "failed to remove intermediate");
                self.events.warning(format!(
                    "Could not remove temporary file {}: {e}",
                    artifact.path().display()
                ));
            }
        }
    }

    fn cleanup(&mut self) {
        for artifact in std::mem::take(&mut self.live) {
            if artifact.exists() {
                self.discard(&artifact);
            }
        }
    }
}
