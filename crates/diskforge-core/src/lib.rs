//! Drives `qemu-img` to convert virtual disk images, reporting progress
//! through an event channel.
//!
//! ```rust,no_run
//! # async fn demo() {
//! use diskforge_core::{Config, ConversionIntent, EventChannel, Orchestrator};
//!
//! let (tx, rx) = EventChannel::unbounded();
//! let orchestrator = Orchestrator::new(Config::from_env(), tx);
//! orchestrator
//!     .start_conversion("disk.vhdx", "disk.qcow2", ConversionIntent::formats("vhdx", "qcow2"))
//!     .expect("idle");
//! while let Some(event) = rx.recv_async().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod events;
pub mod runtime;

pub use catalog::{Catalog, ConversionIntent, DiskFormat, NamedMode, default_destination};
pub use config::Config;
pub use events::{Event, EventChannel, EventKind, EventReceiver, EventSender};
pub use runtime::orchestrator::{Activity, Orchestrator, OrchestratorState};
pub use runtime::pipeline::{PipelineRun, PipelineSpec, RunPhase, RunState};
pub use runtime::progress::{human_duration, human_size};
pub use runtime::runner::{ProcessRunner, ToolRunner};
pub use runtime::stage::StageSpec;
pub use runtime::types::{ConvertError, FinalStatus};
