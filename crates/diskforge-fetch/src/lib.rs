//! Locating and acquiring the `qemu-img` imaging tool.
//!
//! [`ToolLocator`] resolves an existing binary; [`Api`] downloads, unpacks and
//! verifies a release build when none is found.

pub mod api;
pub mod downloader;
pub mod error;
pub mod install;
pub mod locate;
pub mod platform;
pub mod progress;

pub use api::{Api, DEFAULT_API_BASE, RepoApi, VersionApi};
pub use error::FetchError;
pub use install::VersionInfo;
pub use locate::{LocationKind, ToolLocation, ToolLocator};
pub use platform::Platform;
pub use progress::{DownloadProgress, LogLevel};
