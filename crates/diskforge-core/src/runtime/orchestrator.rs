use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use diskforge_fetch::{
    Api, DownloadProgress, LocationKind, LogLevel, ToolLocation, ToolLocator, VersionInfo,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, ConversionIntent};
use crate::config::Config;
use crate::events::{Event, EventSender};
use crate::runtime::pipeline::PipelineRun;
use crate::runtime::progress::estimate_remaining;
use crate::runtime::runner::{ProcessRunner, ToolRunner};
use crate::runtime::types::ConvertError;

/// What the background worker is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Conversion {
        source: PathBuf,
        destination: PathBuf,
        intent: ConversionIntent,
    },
    Acquisition,
}

/// Orchestrator state. At most one activity runs at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running(Activity),
}

enum ToolSource {
    /// Resolve the tool on every run (it may be installed in between).
    Locate {
        locator: ToolLocator,
        tool_override: Option<PathBuf>,
    },
    /// Always use this runner.
    Fixed(Arc<dyn ToolRunner>),
}

struct Inner {
    config: Config,
    catalog: Catalog,
    tools: ToolSource,
    events: EventSender,
    state: Mutex<OrchestratorState>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn runner(&self) -> Arc<dyn ToolRunner> {
        match &self.tools {
            ToolSource::Fixed(runner) => Arc::clone(runner),
            ToolSource::Locate {
                locator,
                tool_override,
            } => {
                // Fall back to the bare name so a missing tool surfaces as a
                // launch-time `ToolNotFound`.
                let program = tool_override
                    .clone()
                    .or_else(|| locator.locate().map(|l| l.path))
                    .unwrap_or_else(|| PathBuf::from(locator.binary_name()));
                Arc::new(ProcessRunner::new(program))
            }
        }
    }
}

/// Returns the orchestrator to `Idle` when dropped, including when the
/// worker panics.
struct RunningGuard {
    inner: Arc<Inner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.inner.lock_state() = OrchestratorState::Idle;
    }
}

/// Entry point for the presentation layer.
///
/// Starts conversions and tool acquisition on a background worker and
/// reports everything through the [`EventSender`] it was built with. A second
/// start while one is in flight is rejected with [`ConvertError::Busy`].
///
/// `start_*` spawn onto the current Tokio runtime and must be called from
/// within one.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// An orchestrator that locates qemu-img according to `config`.
    pub fn new(config: Config, events: EventSender) -> Self {
        let locator = ToolLocator::new(&config.bundled_dir, &config.install_dir);
        let tools = ToolSource::Locate {
            locator,
            tool_override: config.tool_override.clone(),
        };
        Self::build(config, tools, events)
    }

    /// An orchestrator that always runs `runner`.
    pub fn with_runner(config: Config, runner: Arc<dyn ToolRunner>, events: EventSender) -> Self {
        Self::build(config, ToolSource::Fixed(runner), events)
    }

    fn build(config: Config, tools: ToolSource, events: EventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                catalog: Catalog::default(),
                tools,
                events,
                state: Mutex::new(OrchestratorState::Idle),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn state(&self) -> OrchestratorState {
        self.inner.lock_state().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.inner.lock_state(), OrchestratorState::Running(_))
    }

    /// Where qemu-img would be taken from right now.
    pub fn locate_tool(&self) -> Option<ToolLocation> {
        match &self.inner.tools {
            ToolSource::Fixed(runner) => Some(ToolLocation {
                path: runner.program().to_path_buf(),
                kind: LocationKind::Explicit,
            }),
            ToolSource::Locate {
                tool_override: Some(path),
                ..
            } => path.is_file().then(|| ToolLocation {
                path: path.clone(),
                kind: LocationKind::Explicit,
            }),
            ToolSource::Locate { locator, .. } => locator.locate(),
        }
    }

    pub fn tool_available(&self) -> bool {
        self.locate_tool().is_some()
    }

    /// Release recorded by the last successful acquisition, if any.
    pub fn installed_version(&self) -> Option<VersionInfo> {
        let cfg = &self.inner.config;
        Api::new()
            .set_install_dir(cfg.install_dir.clone())
            .repo(cfg.release_repo.clone())
            .installed_version()
            .ok()
    }

    fn try_begin(&self, activity: Activity) -> Result<RunningGuard, ConvertError> {
        let mut state = self.inner.lock_state();
        if let OrchestratorState::Running(current) = &*state {
            warn!(?current, "rejecting start while busy");
            return Err(ConvertError::Busy);
        }
        *state = OrchestratorState::Running(activity);
        Ok(RunningGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Convert `source` into `destination` as described by `intent`.
    ///
    /// The handle resolves to the run's success flag, the same value carried
    /// by the final `Done` event.
    pub fn start_conversion(
        &self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        intent: ConversionIntent,
    ) -> Result<JoinHandle<bool>, ConvertError> {
        let source = source.into();
        let destination = destination.into();
        let guard = self.try_begin(Activity::Conversion {
            source: source.clone(),
            destination: destination.clone(),
            intent: intent.clone(),
        })?;
        let inner = Arc::clone(&self.inner);

        Ok(tokio::spawn(async move {
            info!(%intent, source = %source.display(), destination = %destination.display(), "conversion started");

            let outcome = match inner.catalog.resolve(&intent) {
                Ok(spec) => {
                    let runner = inner.runner();
                    let events = inner.events.clone();
                    tokio::task::spawn_blocking(move || {
                        PipelineRun::new(&spec, source, destination, runner.as_ref(), &events)
                            .execute()
                            .map(|_| ())
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(ConvertError::Io {
                            message: format!("conversion worker failed: {e}"),
                        })
                    })
                }
                Err(e) => Err(e),
            };

            finish(guard, &inner.events, outcome)
        }))
    }

    /// Download, unpack and verify qemu-img into the configured install
    /// directory. Makes one attempt.
    pub fn start_acquisition(&self) -> Result<JoinHandle<bool>, ConvertError> {
        let guard = self.try_begin(Activity::Acquisition)?;
        let inner = Arc::clone(&self.inner);

        Ok(tokio::spawn(async move {
            let cfg = &inner.config;
            let events = inner.events.clone();
            events.info(format!("Acquiring qemu-img from {}", cfg.release_repo));

            let progress_events = events.clone();
            let log_events = events.clone();
            let outcome = Api::new()
                .set_install_dir(cfg.install_dir.clone())
                .set_api_base(cfg.release_api_base.clone())
                .set_proxy(cfg.proxy.clone())
                .repo(cfg.release_repo.clone())
                .latest()
                .install(
                    move |p| progress_events.send(download_event(p)),
                    move |level, msg| match level {
                        LogLevel::Info => log_events.info(msg),
                        LogLevel::Ok => log_events.ok(msg),
                        LogLevel::Warn => log_events.warning(msg),
                        // The terminal error event is sent by `finish`.
                        LogLevel::Error => log_events.log(msg),
                    },
                )
                .await
                .map(|binary| info!(path = %binary.display(), "qemu-img acquired"))
                .map_err(ConvertError::from);

            finish(guard, &events, outcome)
        }))
    }
}

/// Emit the terminal events: at most one `Error`, then `Done`. The
/// orchestrator is idle again before `Done` is sent.
fn finish(guard: RunningGuard, events: &EventSender, outcome: Result<(), ConvertError>) -> bool {
    let success = match outcome {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, missing_dependency = e.is_missing_dependency(), "run failed");
            events.error(e);
            false
        }
    };
    drop(guard);
    events.done(success);
    success
}

fn download_event(p: DownloadProgress) -> Event {
    let percent = p.percent();
    Event::Download {
        downloaded: p.downloaded,
        total: p.total,
        percent,
        bytes_per_sec: p.bytes_per_sec(),
        remaining: percent.and_then(|pct| estimate_remaining(p.elapsed, pct)),
    }
}
